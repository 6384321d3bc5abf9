//! Pass Scheduler
//!
//! Runs a worker session on every tick of the scan interval, on `Trigger`
//! requests and after SIGHUP. Retryable failures are retried with exponential
//! backoff capped at the scan interval. SIGHUP also reloads the host snapshot.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use ms_core::constants::daemon::{PASS_WAIT_MARGIN, RETRY_BASE_DELAY};
use ms_core::{
    Coordinator, HostSnapshot, PassOutcome, PassState, PermissionGate, ReconcileConfig,
    SnapshotPlatform, Worker,
};
use ms_protocol::{PassReport, StatusInfo};

/// Permission answer that follows the loaded snapshot
#[derive(Debug)]
pub struct HostPermission(AtomicBool);

impl HostPermission {
    pub fn new(granted: bool) -> Self {
        Self(AtomicBool::new(granted))
    }

    pub fn set(&self, granted: bool) {
        self.0.store(granted, Ordering::SeqCst);
    }
}

impl PermissionGate for HostPermission {
    fn has_required_permission(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SchedulerState {
    pub worker: Arc<Worker>,
    pub config: ReconcileConfig,
    pub snapshot_path: PathBuf,
    pub permission: Arc<HostPermission>,
    /// Wake the loop for an immediate pass
    pub wake: Notify,
    /// Reload the snapshot before the next pass
    pub reload_signal: AtomicBool,
    pub consecutive_failures: AtomicU32,
    pub last_report: Mutex<Option<PassReport>>,
}

impl SchedulerState {
    pub fn new(
        worker: Arc<Worker>,
        config: ReconcileConfig,
        snapshot_path: PathBuf,
        permission: Arc<HostPermission>,
    ) -> Self {
        Self {
            worker,
            config,
            snapshot_path,
            permission,
            wake: Notify::new(),
            reload_signal: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_report: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.worker.coordinator()
    }

    /// Queue a pass without waiting for it
    pub fn signal_trigger(&self) {
        self.wake.notify_one();
    }

    /// Reload the snapshot, then run a pass
    pub fn signal_reload(&self) {
        self.reload_signal.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Check and clear reload signal
    pub fn check_reload_signal(&self) -> bool {
        self.reload_signal.swap(false, Ordering::SeqCst)
    }

    /// Swap in a freshly loaded host snapshot
    pub fn reload_snapshot(&self) -> ms_core::Result<()> {
        let snapshot = HostSnapshot::load(&self.snapshot_path)?;
        self.permission.set(snapshot.permission_granted);
        info!(
            path = %self.snapshot_path.display(),
            slots = snapshot.slots.len(),
            sdk = snapshot.sdk_level,
            "Host snapshot reloaded"
        );
        self.coordinator()
            .replace_platform(Arc::new(SnapshotPlatform::new(snapshot)));
        Ok(())
    }

    /// Longest a session may take before it is abandoned
    pub fn pass_timeout(&self) -> Duration {
        self.config.settle_delay() + PASS_WAIT_MARGIN
    }

    /// Run one worker session on the blocking pool and record its result
    pub async fn run_session(&self) -> PassReport {
        let worker = self.worker.clone();
        let timeout = self.pass_timeout();
        let report = match tokio::task::spawn_blocking(move || worker.run_once(timeout)).await {
            Ok(outcome) => report_for(outcome),
            Err(e) => {
                error!("Worker session aborted: {}", e);
                PassReport::Failed { retryable: true }
            }
        };

        if wants_retry(report) {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        }
        *self.last_report.lock() = Some(report);
        report
    }

    /// Delay before the next scheduled session
    pub fn next_delay(&self) -> Duration {
        let interval = self.config.scan_interval();
        match self.consecutive_failures.load(Ordering::SeqCst) {
            0 => interval,
            n => retry_delay(n, interval),
        }
    }

    pub fn status(&self) -> StatusInfo {
        let stats = self.coordinator().stats();
        StatusInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: state_label(self.coordinator().state()),
            passes: stats.passes,
            changes: stats.changes,
            failures: stats.failures,
            last_report: *self.last_report.lock(),
            scan_interval_secs: self.config.scan_interval_secs,
            slot_count: self.config.slot_count,
            snapshot_path: Some(self.snapshot_path.display().to_string()),
        }
    }
}

/// Map a session result to its wire form
pub fn report_for(outcome: Option<PassOutcome>) -> PassReport {
    match outcome {
        Some(PassOutcome::Success { changed: true }) => PassReport::Changed,
        Some(PassOutcome::Success { changed: false }) => PassReport::Unchanged,
        Some(PassOutcome::Failure { retryable }) => PassReport::Failed { retryable },
        Some(PassOutcome::Retry) => PassReport::Retry,
        None => PassReport::TimedOut,
    }
}

fn wants_retry(report: PassReport) -> bool {
    matches!(
        report,
        PassReport::Failed { retryable: true } | PassReport::Retry | PassReport::TimedOut
    )
}

/// Exponential backoff for the `failures`-th consecutive failure, capped at `cap`
pub fn retry_delay(failures: u32, cap: Duration) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    RETRY_BASE_DELAY.saturating_mul(factor).min(cap)
}

pub fn state_label(state: PassState) -> String {
    match state {
        PassState::Idle => "idle".to_string(),
        PassState::Probing => "probing".to_string(),
        PassState::Reconciling => "reconciling".to_string(),
        PassState::Settling => "settling".to_string(),
        PassState::Done => "done".to_string(),
        PassState::Failed { retryable: true } => "failed (will retry)".to_string(),
        PassState::Failed { retryable: false } => "failed".to_string(),
    }
}

/// Main scheduling loop
pub async fn run_scheduler(state: Arc<SchedulerState>, shutdown: Arc<AtomicBool>) {
    info!(
        interval_secs = state.config.scan_interval_secs,
        "Pass scheduler starting"
    );

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Pass scheduler shutting down");
            break;
        }

        if state.check_reload_signal() {
            info!("SIGNAL: Snapshot reload requested");
            if let Err(e) = state.reload_snapshot() {
                warn!("Snapshot reload failed, keeping previous host: {}", e);
            }
        }

        let report = state.run_session().await;
        match report {
            PassReport::Changed => info!("SIM list changed"),
            PassReport::Unchanged => debug!("SIM list unchanged"),
            PassReport::Failed { retryable: false } => {
                warn!("Pass failed permanently, waiting for next interval")
            }
            other => warn!(
                ?other,
                failures = state.consecutive_failures.load(Ordering::SeqCst),
                "Pass did not complete, retrying"
            ),
        }

        // Sleep until the next tick, but wake up immediately on trigger or reload
        let delay = state.next_delay();
        debug!(delay_secs = delay.as_secs(), "Next pass scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = state.wake.notified() => {
                debug!("Scheduler woken up by trigger");
            }
        }
    }

    info!("Pass scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_core::platform::SlotSnapshot;
    use ms_core::{
        Collaborators, MemoryStore, SimState, SnapshotEvents, TracingReporter, TracingSink,
    };
    use std::io::Write;

    fn snapshot_json(serial: &str) -> String {
        let snapshot = HostSnapshot {
            slots: vec![SlotSnapshot {
                subscription_id: 1,
                state: SimState::Ready,
                device_id: Some("356938035643809".into()),
                serial: Some(serial.into()),
                ..SlotSnapshot::empty(0)
            }],
            ..Default::default()
        };
        serde_json::to_string(&snapshot).unwrap()
    }

    fn state(snapshot: &tempfile::NamedTempFile) -> SchedulerState {
        let host = HostSnapshot::load(snapshot.path()).unwrap();
        let permission = Arc::new(HostPermission::new(host.permission_granted));
        let config = ReconcileConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let coordinator = Arc::new(Coordinator::new(
            config.clone(),
            Collaborators {
                platform: Arc::new(SnapshotPlatform::new(host)),
                permission: permission.clone(),
                store: Arc::new(MemoryStore::new()),
                sink: Arc::new(TracingSink),
                reporter: Arc::new(TracingReporter),
            },
        ));
        let worker = Arc::new(Worker::new(
            coordinator,
            Arc::new(SnapshotEvents::new()),
            Arc::new(TracingReporter),
        ));
        SchedulerState::new(worker, config, snapshot.path().to_path_buf(), permission)
    }

    fn write_snapshot(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_retry_delay_backs_off_to_cap() {
        let cap = Duration::from_secs(900);
        assert_eq!(retry_delay(1, cap), Duration::from_secs(30));
        assert_eq!(retry_delay(2, cap), Duration::from_secs(60));
        assert_eq!(retry_delay(4, cap), Duration::from_secs(240));
        assert_eq!(retry_delay(10, cap), cap);
        assert_eq!(retry_delay(u32::MAX, cap), cap);
    }

    #[test]
    fn test_report_mapping() {
        assert_eq!(report_for(None), PassReport::TimedOut);
        assert_eq!(report_for(Some(PassOutcome::Retry)), PassReport::Retry);
        assert_eq!(
            report_for(Some(PassOutcome::Failure { retryable: false })),
            PassReport::Failed { retryable: false }
        );
        assert!(!wants_retry(PassReport::Failed { retryable: false }));
        assert!(wants_retry(PassReport::TimedOut));
    }

    #[tokio::test]
    async fn test_session_updates_status() {
        let snapshot = write_snapshot(&snapshot_json("8901"));
        let state = state(&snapshot);

        assert_eq!(state.run_session().await, PassReport::Changed);
        assert_eq!(state.run_session().await, PassReport::Unchanged);

        let status = state.status();
        assert_eq!(status.passes, 2);
        assert_eq!(status.changes, 1);
        assert_eq!(status.last_report, Some(PassReport::Unchanged));
        assert_eq!(status.state, "done");
        assert_eq!(state.next_delay(), state.config.scan_interval());
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_snapshot() {
        let snapshot = write_snapshot(&snapshot_json("8901"));
        let state = state(&snapshot);
        state.run_session().await;

        std::fs::write(snapshot.path(), snapshot_json("8902")).unwrap();
        state.reload_snapshot().unwrap();

        assert_eq!(state.run_session().await, PassReport::Changed);
        let sims = state.coordinator().current_sims().unwrap();
        assert_eq!(sims.len(), 1);
        assert_eq!(sims[0].serial_id.as_deref(), Some("8902"));
    }

    #[tokio::test]
    async fn test_revoked_permission_is_not_retried() {
        let snapshot = write_snapshot(&snapshot_json("8901"));
        let state = state(&snapshot);
        state.permission.set(false);

        assert_eq!(state.run_session().await, PassReport::Failed { retryable: false });
        assert_eq!(state.consecutive_failures.load(Ordering::SeqCst), 0);
    }
}
