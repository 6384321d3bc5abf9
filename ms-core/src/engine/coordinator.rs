//! Reconciliation coordinator
//!
//! Runs one end-to-end pass: permission check, enumeration and validation,
//! canonical list, change detection, settle delay. Two fair locks serialize the
//! work: the outer one around whole passes (waiters queue in arrival order and
//! are never dropped) and the inner one around probing, which also owns the
//! capability registry.
//!
//! Nothing escapes a pass: errors and panics below the coordinator become a
//! [`PassOutcome`].

use parking_lot::{FairMutex, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use super::canonical::build;
use super::enumerate::{enumerate_handles, pair_with_subscriptions};
use super::reconcile::reconcile;
use super::registry::CapabilityRegistry;
use crate::data::{SimRecord, SimStore};
use crate::error::{MultiSimError, Result};
use crate::notify::{ErrorReporter, NotificationSink};
use crate::platform::{PermissionGate, Platform};
use crate::settings::ReconcileConfig;

/// Where a pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PassState {
    Idle,
    Probing,
    Reconciling,
    Settling,
    Done,
    Failed { retryable: bool },
}

/// What a pass or session reports to its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PassOutcome {
    Success { changed: bool },
    Failure { retryable: bool },
    /// Try again later, e.g. listeners could not be registered
    Retry,
}

impl PassOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the scheduler should run this work again soon
    pub fn wants_retry(&self) -> bool {
        matches!(self, Self::Retry | Self::Failure { retryable: true })
    }
}

/// Collaborators a coordinator is built from
pub struct Collaborators {
    pub platform: Arc<dyn Platform>,
    pub permission: Arc<dyn PermissionGate>,
    pub store: Arc<dyn SimStore>,
    pub sink: Arc<dyn NotificationSink>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Pass counters exposed to status queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub passes: u64,
    pub changes: u64,
    pub failures: u64,
    pub last_outcome: Option<PassOutcome>,
}

pub struct Coordinator {
    config: ReconcileConfig,
    platform: RwLock<Arc<dyn Platform>>,
    permission: Arc<dyn PermissionGate>,
    store: Arc<dyn SimStore>,
    sink: Arc<dyn NotificationSink>,
    reporter: Arc<dyn ErrorReporter>,
    /// End-to-end passes
    pass_lock: FairMutex<()>,
    /// Enumeration and validation
    probe_lock: FairMutex<CapabilityRegistry>,
    state: Mutex<PassState>,
    stats: Mutex<PassStats>,
}

impl Coordinator {
    pub fn new(config: ReconcileConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            platform: RwLock::new(collaborators.platform),
            permission: collaborators.permission,
            store: collaborators.store,
            sink: collaborators.sink,
            reporter: collaborators.reporter,
            pass_lock: FairMutex::new(()),
            probe_lock: FairMutex::new(CapabilityRegistry::new()),
            state: Mutex::new(PassState::Idle),
            stats: Mutex::new(PassStats::default()),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SimStore> {
        &self.store
    }

    pub fn state(&self) -> PassState {
        *self.state.lock()
    }

    pub fn stats(&self) -> PassStats {
        *self.stats.lock()
    }

    pub fn has_permission(&self) -> bool {
        self.permission.has_required_permission()
    }

    /// Swap the host platform. Waits for an in-flight probe, then resets the
    /// capability registry since it describes the old host.
    pub fn replace_platform(&self, platform: Arc<dyn Platform>) {
        let mut registry = self.probe_lock.lock();
        *self.platform.write() = platform;
        registry.clear();
        info!("Host platform replaced");
    }

    fn set_state(&self, state: PassState) {
        debug!(?state, "Pass state");
        *self.state.lock() = state;
    }

    /// Run one pass. Blocks through the settle delay.
    pub fn run_pass(&self) -> PassOutcome {
        let outcome = {
            let _pass = self.pass_lock.lock();
            if !self.permission.has_required_permission() {
                warn!("Missing phone-state permission, not probing");
                self.set_state(PassState::Failed { retryable: false });
                return self.record(PassOutcome::Failure { retryable: false });
            }
            self.set_state(PassState::Probing);
            match panic::catch_unwind(AssertUnwindSafe(|| self.probe_and_reconcile())) {
                Ok(Ok(changed)) => PassOutcome::Success { changed },
                Ok(Err(e)) => {
                    warn!(error = %e, "SIM pass failed");
                    self.reporter.capture("reconcile pass", &e);
                    PassOutcome::Failure {
                        retryable: e.is_retryable(),
                    }
                }
                Err(panic) => {
                    let e = MultiSimError::fault(panic_message(panic.as_ref()));
                    warn!(error = %e, "SIM pass panicked");
                    self.reporter.capture("reconcile pass", &e);
                    PassOutcome::Failure { retryable: true }
                }
            }
        };

        // Let platform callbacks triggered by probing land before completing
        self.set_state(PassState::Settling);
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.set_state(match outcome {
            PassOutcome::Failure { retryable } => PassState::Failed { retryable },
            _ => PassState::Done,
        });
        self.record(outcome)
    }

    fn record(&self, outcome: PassOutcome) -> PassOutcome {
        let mut stats = self.stats.lock();
        stats.passes += 1;
        match outcome {
            PassOutcome::Success { changed: true } => stats.changes += 1,
            PassOutcome::Success { changed: false } => {}
            _ => stats.failures += 1,
        }
        stats.last_outcome = Some(outcome);
        outcome
    }

    fn probe_and_reconcile(&self) -> Result<bool> {
        let platform = self.platform.read().clone();
        let slot_count = self.config.slot_count;

        let new_list = {
            let mut registry = self.probe_lock.lock();
            let mut enumeration = enumerate_handles(platform.as_ref(), &mut registry, slot_count);
            let subscriptions = if platform.has_subscription_api() {
                let subscriptions = platform.active_subscriptions()?;
                pair_with_subscriptions(platform.as_ref(), &registry, &mut enumeration, &subscriptions);
                subscriptions
            } else {
                Vec::new()
            };
            build(
                &enumeration.candidates,
                &subscriptions,
                &|id| platform.is_network_roaming(id),
                self.config.dedup_policy,
            )
        };

        self.set_state(PassState::Reconciling);
        let old_list = self.store.saved_list(slot_count)?;
        debug!(old = old_list.len(), new = new_list.len(), "Reviewing SIM info");
        let outcome = reconcile(
            &new_list,
            Some(&old_list),
            self.store.as_ref(),
            self.sink.as_ref(),
            self.reporter.as_ref(),
        )?;
        if outcome.changed {
            info!(upserted = outcome.upserted, removed = outcome.removed, "SIM list updated");
        }
        Ok(outcome.changed)
    }

    /// SIMs currently in a slot, in slot order
    pub fn current_sims(&self) -> Result<Vec<SimRecord>> {
        self.store.saved_list(self.config.slot_count)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
