//! End-to-end reconciliation tests against snapshot hosts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use ms_core::data::SimStore;
use ms_core::platform::SlotSnapshot;
use ms_core::{
    ChannelSink, Collaborators, Coordinator, DedupPolicy, HostSnapshot, MemoryStore,
    MultiSimError, NotificationSink, PassOutcome, ReconcileConfig, Result, SimEvent, SimRecord,
    SimState, SnapshotPlatform, StaticPermission, TracingReporter, VendorSurface,
};

fn ready(slot_index: i32, subscription_id: i32, serial: &str) -> SlotSnapshot {
    SlotSnapshot {
        subscription_id,
        state: SimState::Ready,
        device_id: Some(format!("35693803564380{}", slot_index)),
        serial: Some(serial.to_string()),
        subscriber_id: Some("639021234567890".to_string()),
        operator: Some("63902".to_string()),
        operator_name: Some("Safaricom".to_string()),
        country_iso: Some("ke".to_string()),
        ..SlotSnapshot::empty(slot_index)
    }
}

fn host(slots: Vec<SlotSnapshot>) -> Arc<SnapshotPlatform> {
    Arc::new(SnapshotPlatform::new(HostSnapshot {
        surfaces: vec![VendorSurface::Standard],
        slots,
        ..Default::default()
    }))
}

struct Harness {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn SimStore>,
    events: mpsc::Receiver<SimEvent>,
}

fn harness(platform: Arc<SnapshotPlatform>, store: Arc<dyn SimStore>) -> Harness {
    let (tx, events) = mpsc::channel();
    let coordinator = Coordinator::new(
        ReconcileConfig {
            settle_delay_ms: 0,
            ..Default::default()
        },
        Collaborators {
            platform,
            permission: Arc::new(StaticPermission(true)),
            store: store.clone(),
            sink: Arc::new(ChannelSink::new(tx)),
            reporter: Arc::new(TracingReporter),
        },
    );
    Harness {
        coordinator: Arc::new(coordinator),
        store,
        events,
    }
}

fn notifications(rx: &mpsc::Receiver<SimEvent>) -> usize {
    rx.try_iter().count()
}

#[test]
fn first_pass_persists_and_notifies_once() {
    let h = harness(host(vec![ready(0, 1, "8925-4021"), ready(1, 2, "8925-4022")]), Arc::new(MemoryStore::new()));

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: true });
    assert_eq!(notifications(&h.events), 1);

    let sims = h.store.get_all().unwrap();
    assert_eq!(sims.len(), 2);
    assert_eq!(sims[0].serial_id.as_deref(), Some("89254021"));
    assert_eq!(sims[0].to_string(), "Safaricom KE (SIM 1)");
    assert_eq!(sims[1].slot_index, 1);
}

#[test]
fn stable_host_is_unchanged() {
    let h = harness(host(vec![ready(0, 1, "8901")]), Arc::new(MemoryStore::new()));
    h.coordinator.run_pass();
    notifications(&h.events);

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: false });
    assert_eq!(notifications(&h.events), 0);
}

#[test]
fn slot_move_is_a_change() {
    let store: Arc<dyn SimStore> = Arc::new(MemoryStore::with_records(&[SimRecord::new(0, 1, Some("8901".into()))]).unwrap());
    let h = harness(host(vec![ready(1, 2, "8901")]), store);

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: true });
    assert_eq!(notifications(&h.events), 1);
    assert_eq!(h.store.get_by_serial_id("8901").unwrap().unwrap().slot_index, 1);
    assert!(h.store.get_by_slot(0).unwrap().is_none());
}

#[test]
fn size_change_is_a_change() {
    let store: Arc<dyn SimStore> = Arc::new(MemoryStore::with_records(&[SimRecord::new(0, 1, Some("8901".into()))]).unwrap());
    let h = harness(host(vec![ready(0, 1, "8901"), ready(1, 2, "8902")]), store);

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: true });
    assert_eq!(h.store.get_all().unwrap().len(), 2);
}

#[test]
fn removed_sim_is_marked_not_deleted() {
    let store: Arc<dyn SimStore> = Arc::new(
        MemoryStore::with_records(&[
            SimRecord::new(0, 1, Some("8901".into())),
            SimRecord::new(1, 2, Some("8902".into())),
        ])
        .unwrap(),
    );
    let h = harness(host(vec![ready(0, 1, "8901")]), store);

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: true });
    let b = h.store.get_by_serial_id("8902").unwrap().unwrap();
    assert_eq!(b.slot_index, -1);
    assert_eq!(b.sim_state, SimState::Removed);
    assert_eq!(h.store.get_all().unwrap().len(), 2);
}

#[test]
fn slot_without_device_id_is_not_recorded() {
    let mut no_device = ready(0, 1, "123");
    no_device.device_id = None;
    let platform = Arc::new(SnapshotPlatform::new(HostSnapshot {
        sdk_level: 19,
        slots: vec![no_device],
        ..Default::default()
    }));
    let h = harness(platform, Arc::new(MemoryStore::new()));

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: false });
    assert!(h.store.get_all().unwrap().is_empty());
}

#[test]
fn serial_without_digits_never_reports_a_change() {
    for sdk_level in [19, 30] {
        let platform = Arc::new(SnapshotPlatform::new(HostSnapshot {
            sdk_level,
            slots: vec![ready(0, 1, "N/A")],
            ..Default::default()
        }));
        let h = harness(platform, Arc::new(MemoryStore::new()));

        for _ in 0..2 {
            assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: false });
        }
        assert_eq!(notifications(&h.events), 0);
        assert!(h.store.get_all().unwrap().is_empty());
    }
}

#[test]
fn unreadable_serial_beside_real_sim_settles() {
    let h = harness(host(vec![ready(0, 1, "8901"), ready(1, 2, "FFFFFFFF")]), Arc::new(MemoryStore::new()));

    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: true });
    assert_eq!(h.coordinator.run_pass(), PassOutcome::Success { changed: false });
    assert_eq!(notifications(&h.events), 1);
    assert_eq!(h.store.get_all().unwrap().len(), 1);
}

#[test]
fn legacy_mediatek_host_is_discovered() {
    let platform = Arc::new(SnapshotPlatform::new(HostSnapshot {
        sdk_level: 19,
        surfaces: vec![VendorSurface::Mediatek],
        slots: vec![ready(0, 0, "8901"), ready(1, 1, "8902")],
        ..Default::default()
    }));
    let h = harness(platform, Arc::new(MemoryStore::new()));

    assert!(h.coordinator.run_pass().is_success());
    let slots: Vec<i32> = h.store.get_all().unwrap().iter().map(|s| s.slot_index).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[test]
fn most_complete_policy_prefers_richer_duplicate() {
    // The subscription record for slot 1 carries no operator fields beyond the
    // carrier; the probed one has everything. Both policies keep the probed one
    // here since it comes first and is richer.
    let platform = host(vec![ready(0, 1, "8901"), ready(1, 2, "8902")]);
    let (tx, _rx) = mpsc::channel();
    let coordinator = Coordinator::new(
        ReconcileConfig {
            settle_delay_ms: 0,
            dedup_policy: DedupPolicy::MostComplete,
            ..Default::default()
        },
        Collaborators {
            platform,
            permission: Arc::new(StaticPermission(true)),
            store: Arc::new(MemoryStore::new()),
            sink: Arc::new(ChannelSink::new(tx)),
            reporter: Arc::new(TracingReporter),
        },
    );
    assert!(coordinator.run_pass().is_success());
    let sims = coordinator.current_sims().unwrap();
    assert_eq!(sims.len(), 2);
    assert!(sims.iter().all(|s| s.device_id.is_some()));
}

/// Store that fails the test if two write sequences overlap
struct ExclusiveStore {
    inner: MemoryStore,
    writers: AtomicUsize,
    max_writers: AtomicUsize,
}

impl ExclusiveStore {
    fn enter(&self) {
        let now = self.writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writers.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
    }

    fn leave(&self) {
        self.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimStore for ExclusiveStore {
    fn get_by_slot(&self, slot_index: i32) -> Result<Option<SimRecord>> {
        self.inner.get_by_slot(slot_index)
    }

    fn get_by_serial_id(&self, serial_id: &str) -> Result<Option<SimRecord>> {
        self.inner.get_by_serial_id(serial_id)
    }

    fn get_all(&self) -> Result<Vec<SimRecord>> {
        self.inner.get_all()
    }

    fn upsert(&self, record: &SimRecord) -> Result<()> {
        self.enter();
        let result = self.inner.upsert(record);
        self.leave();
        result
    }

    fn mark_removed(&self, record: &SimRecord) -> Result<()> {
        self.enter();
        let result = self.inner.mark_removed(record);
        self.leave();
        result
    }
}

#[test]
fn concurrent_triggers_notify_once() {
    let store = Arc::new(ExclusiveStore {
        inner: MemoryStore::new(),
        writers: AtomicUsize::new(0),
        max_writers: AtomicUsize::new(0),
    });
    let h = harness(host(vec![ready(0, 1, "8901"), ready(1, 2, "8902")]), store.clone());

    let barrier = Arc::new(Barrier::new(2));
    let threads: Vec<_> = (0..2)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                coordinator.run_pass()
            })
        })
        .collect();
    let outcomes: Vec<PassOutcome> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(outcomes.iter().filter(|o| **o == PassOutcome::Success { changed: true }).count(), 1);
    assert_eq!(notifications(&h.events), 1);
    assert_eq!(store.max_writers.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.stats().passes, 2);
}

#[test]
fn failing_store_is_a_retryable_failure() {
    struct BrokenStore;

    impl SimStore for BrokenStore {
        fn get_by_slot(&self, _: i32) -> Result<Option<SimRecord>> {
            Err(MultiSimError::store("unreadable"))
        }
        fn get_by_serial_id(&self, _: &str) -> Result<Option<SimRecord>> {
            Ok(None)
        }
        fn get_all(&self) -> Result<Vec<SimRecord>> {
            Ok(Vec::new())
        }
        fn upsert(&self, _: &SimRecord) -> Result<()> {
            Ok(())
        }
        fn mark_removed(&self, _: &SimRecord) -> Result<()> {
            Ok(())
        }
    }

    let h = harness(host(vec![ready(0, 1, "8901")]), Arc::new(BrokenStore));
    assert_eq!(h.coordinator.run_pass(), PassOutcome::Failure { retryable: true });
    assert_eq!(notifications(&h.events), 0);
}

#[test]
fn channel_sink_is_a_notification_sink() {
    let (tx, rx) = mpsc::channel();
    let sink: Box<dyn NotificationSink> = Box::new(ChannelSink::new(tx));
    sink.publish(SimEvent::SimListChanged { sim_count: 3 });
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), SimEvent::SimListChanged { sim_count: 3 });
}
