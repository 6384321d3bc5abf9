//! Listener-driven worker sessions
//!
//! A session registers for state-change callbacks; each callback runs a pass
//! on its own thread. The first pass to finish completes the session, later
//! ones only update the store. Stopping the session unregisters the listener
//! and discards any result still in flight.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::coordinator::{Coordinator, PassOutcome};
use crate::error::MultiSimError;
use crate::notify::ErrorReporter;
use crate::platform::{ListenerId, StateCallback, StateEvents};

#[derive(Debug, Default)]
struct CompletionState {
    outcome: Option<PassOutcome>,
    cancelled: bool,
}

/// A result delivered at most once
#[derive(Debug, Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
    ready: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `outcome`. Returns false when a result was already delivered
    /// or the session was cancelled.
    pub fn complete(&self, outcome: PassOutcome) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some() || state.cancelled {
            return false;
        }
        state.outcome = Some(outcome);
        self.ready.notify_all();
        true
    }

    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        self.ready.notify_all();
    }

    pub fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.outcome.is_some() || state.cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Block until completed; `None` when cancelled first
    pub fn wait(&self) -> Option<PassOutcome> {
        let mut state = self.state.lock();
        while state.outcome.is_none() && !state.cancelled {
            self.ready.wait(&mut state);
        }
        state.outcome
    }

    /// Like [`Completion::wait`] but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PassOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.outcome.is_none() && !state.cancelled {
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.outcome
    }
}

/// Starts sessions against one coordinator
pub struct Worker {
    coordinator: Arc<Coordinator>,
    events: Arc<dyn StateEvents>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Worker {
    pub fn new(
        coordinator: Arc<Coordinator>,
        events: Arc<dyn StateEvents>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            coordinator,
            events,
            reporter,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Start a session: check permission, then register the listener
    pub fn start(&self) -> Session {
        debug!("Starting multi-SIM worker session");
        let completion = Arc::new(Completion::new());

        if !self.coordinator.has_permission() {
            completion.complete(PassOutcome::Failure { retryable: false });
            return Session::finished(completion, self.events.clone());
        }

        let callback = pass_trigger(self.coordinator.clone(), completion.clone(), self.reporter.clone());
        match self.events.subscribe(callback) {
            Ok(listener) => Session {
                completion,
                events: self.events.clone(),
                listener: Mutex::new(Some(listener)),
            },
            Err(e) => {
                debug!(error = %e, "Failed to start SIM listeners, setting retry");
                completion.complete(PassOutcome::Retry);
                Session::finished(completion, self.events.clone())
            }
        }
    }

    /// Start a session and wait for its first result, then stop it
    pub fn run_once(&self, timeout: Duration) -> Option<PassOutcome> {
        let session = self.start();
        let outcome = session.wait_timeout(timeout);
        session.stop();
        outcome
    }
}

/// Callback that runs one pass on a background thread per state change
fn pass_trigger(
    coordinator: Arc<Coordinator>,
    completion: Arc<Completion>,
    reporter: Arc<dyn ErrorReporter>,
) -> StateCallback {
    Arc::new(move || {
        if completion.is_cancelled() {
            return;
        }
        let coordinator = coordinator.clone();
        let done = completion.clone();
        let spawned = thread::Builder::new()
            .name("multisim-pass".to_string())
            .spawn(move || {
                let outcome = coordinator.run_pass();
                if done.complete(outcome) {
                    debug!(?outcome, "Finishing multi-SIM worker session");
                }
            });
        if let Err(e) = spawned {
            let e = MultiSimError::fault(format!("could not start pass thread: {}", e));
            warn!(error = %e, "Pass not started");
            reporter.capture("state callback", &e);
            completion.complete(PassOutcome::Failure { retryable: true });
        }
    })
}

/// A running worker session
pub struct Session {
    completion: Arc<Completion>,
    events: Arc<dyn StateEvents>,
    listener: Mutex<Option<ListenerId>>,
}

impl Session {
    fn finished(completion: Arc<Completion>, events: Arc<dyn StateEvents>) -> Self {
        Self {
            completion,
            events,
            listener: Mutex::new(None),
        }
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    pub fn wait(&self) -> Option<PassOutcome> {
        self.completion.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<PassOutcome> {
        self.completion.wait_timeout(timeout)
    }

    /// Unregister listeners and suppress results not yet delivered
    pub fn stop(&self) {
        if let Some(listener) = self.listener.lock().take() {
            self.events.unsubscribe(listener);
            debug!("Multi-SIM worker session stopped");
        }
        self.completion.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryStore, SimState};
    use crate::engine::coordinator::Collaborators;
    use crate::notify::{TracingReporter, TracingSink};
    use crate::platform::{HostSnapshot, SlotSnapshot, SnapshotEvents, SnapshotPlatform, StaticPermission};
    use crate::settings::ReconcileConfig;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn coordinator(permission: bool) -> Arc<Coordinator> {
        let platform = SnapshotPlatform::new(HostSnapshot {
            slots: vec![SlotSnapshot {
                subscription_id: 1,
                state: SimState::Ready,
                device_id: Some("35".into()),
                serial: Some("8901".into()),
                ..SlotSnapshot::empty(0)
            }],
            ..Default::default()
        });
        Arc::new(Coordinator::new(
            ReconcileConfig {
                settle_delay_ms: 0,
                ..Default::default()
            },
            Collaborators {
                platform: Arc::new(platform),
                permission: Arc::new(StaticPermission(permission)),
                store: Arc::new(MemoryStore::new()),
                sink: Arc::new(TracingSink),
                reporter: Arc::new(TracingReporter),
            },
        ))
    }

    #[test]
    fn test_completion_delivers_once() {
        let completion = Completion::new();
        assert!(completion.complete(PassOutcome::Success { changed: true }));
        assert!(!completion.complete(PassOutcome::Retry));
        assert_eq!(completion.wait(), Some(PassOutcome::Success { changed: true }));
    }

    #[test]
    fn test_cancelled_completion_rejects_results() {
        let completion = Completion::new();
        completion.cancel();
        assert!(!completion.complete(PassOutcome::Retry));
        assert_eq!(completion.wait(), None);
        assert_eq!(Completion::new().wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_session_completes_on_replayed_event() {
        let events = Arc::new(SnapshotEvents::new());
        let worker = Worker::new(coordinator(true), events.clone(), Arc::new(TracingReporter));

        let session = worker.start();
        assert_eq!(session.wait_timeout(TIMEOUT), Some(PassOutcome::Success { changed: true }));
        assert_eq!(events.listener_count(), 1);

        session.stop();
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn test_missing_permission_fails_without_listening() {
        let events = Arc::new(SnapshotEvents::new());
        let worker = Worker::new(coordinator(false), events.clone(), Arc::new(TracingReporter));

        let session = worker.start();
        assert_eq!(session.wait(), Some(PassOutcome::Failure { retryable: false }));
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn test_listener_registration_failure_is_retry() {
        let events = Arc::new(SnapshotEvents::manual());
        events.refuse_registration(true);
        let worker = Worker::new(coordinator(true), events, Arc::new(TracingReporter));

        assert_eq!(worker.run_once(TIMEOUT), Some(PassOutcome::Retry));
    }

    #[test]
    fn test_manual_events_drive_passes() {
        let events = Arc::new(SnapshotEvents::manual());
        let coordinator = coordinator(true);
        let worker = Worker::new(coordinator.clone(), events.clone(), Arc::new(TracingReporter));

        let session = worker.start();
        assert!(!session.is_done());
        events.fire();
        events.fire();
        assert!(session.wait_timeout(TIMEOUT).unwrap().is_success());

        drop(session);
        assert_eq!(events.listener_count(), 0);
    }
}
