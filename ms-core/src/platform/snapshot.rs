//! Snapshot-backed host platform
//!
//! A [`HostSnapshot`] is a JSON description of a device: SDK level, the
//! permission state, which vendor surfaces exist and what is in each slot.
//! [`SnapshotPlatform`] serves it through the compile-time vendor adapters so
//! the full pass runs against it unchanged.
//!
//! ```json
//! {
//!   "sdk_level": 29,
//!   "surfaces": ["standard", "msim"],
//!   "slots": [
//!     { "slot_index": 0, "subscription_id": 1, "state": "ready",
//!       "device_id": "356938035643809", "serial": "8925402123456789012",
//!       "subscriber_id": "639021234567890", "operator": "63902",
//!       "operator_name": "Safaricom", "country_iso": "ke" }
//!   ]
//! }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::vendors::{SlotTable, VendorSet, VendorSurface};
use super::{ListenerId, PermissionGate, Platform, StateCallback, StateEvents};
use crate::constants::{limits, slots};
use crate::data::{split_hni, SimState, SubscriptionInfo};
use crate::error::{MultiSimError, Result};
use crate::hw::{ClassRef, Handle, ProbeError};

/// Contents of one slot as the host reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub slot_index: i32,
    #[serde(default = "no_subscription")]
    pub subscription_id: i32,
    #[serde(default)]
    pub state: SimState,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Raw ICC ID, as the host would report it
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub subscriber_id: Option<String>,
    /// SIM operator code (HNI)
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub operator_name: Option<String>,
    #[serde(default)]
    pub country_iso: Option<String>,
    #[serde(default)]
    pub network_operator: Option<String>,
    #[serde(default)]
    pub network_operator_name: Option<String>,
    #[serde(default)]
    pub network_country_iso: Option<String>,
    #[serde(default)]
    pub network_type: Option<i32>,
    #[serde(default)]
    pub roaming: bool,
}

fn no_subscription() -> i32 {
    slots::NO_SUBSCRIPTION_ID
}

impl SlotSnapshot {
    /// An empty slot
    pub fn empty(slot_index: i32) -> Self {
        Self {
            slot_index,
            subscription_id: slots::NO_SUBSCRIPTION_ID,
            state: SimState::Absent,
            device_id: None,
            serial: None,
            subscriber_id: None,
            operator: None,
            operator_name: None,
            country_iso: None,
            network_operator: None,
            network_operator_name: None,
            network_country_iso: None,
            network_type: None,
            roaming: false,
        }
    }

    fn subscription(&self) -> Option<SubscriptionInfo> {
        if self.subscription_id < 0 || !self.state.is_ready() {
            return None;
        }
        let (mcc, mnc) = self
            .operator
            .as_deref()
            .and_then(split_hni)
            .unwrap_or_default();
        Some(SubscriptionInfo {
            subscription_id: self.subscription_id,
            slot_index: self.slot_index,
            mcc,
            mnc,
            icc_id: self.serial.clone(),
            carrier_name: self.operator_name.clone(),
            country_iso: self.country_iso.clone(),
        })
    }
}

fn default_sdk_level() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

fn default_surfaces() -> Vec<VendorSurface> {
    vec![VendorSurface::Standard]
}

/// Description of a host device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default = "default_sdk_level")]
    pub sdk_level: u32,
    #[serde(default = "default_true")]
    pub permission_granted: bool,
    #[serde(default = "default_surfaces")]
    pub surfaces: Vec<VendorSurface>,
    #[serde(default)]
    pub slots: Vec<SlotSnapshot>,
    /// Make the subscription service fail, as on hosts where it throws
    #[serde(default)]
    pub fail_subscriptions: bool,
}

impl Default for HostSnapshot {
    fn default() -> Self {
        Self {
            sdk_level: default_sdk_level(),
            permission_granted: true,
            surfaces: default_surfaces(),
            slots: Vec::new(),
            fail_subscriptions: false,
        }
    }
}

impl HostSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a snapshot file, rejecting oversized input
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| MultiSimError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        if metadata.len() > limits::MAX_CONFIG_SIZE {
            return Err(MultiSimError::FileTooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                max_size: limits::MAX_CONFIG_SIZE,
            });
        }
        let content = fs::read_to_string(path).map_err(|e| MultiSimError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot = Self::from_json(&content)?;
        debug!(path = ?path, slots = snapshot.slots.len(), sdk = snapshot.sdk_level, "Loaded host snapshot");
        Ok(snapshot)
    }
}

/// [`Platform`] served from a [`HostSnapshot`]
pub struct SnapshotPlatform {
    sdk_level: u32,
    permission_granted: bool,
    fail_subscriptions: bool,
    table: Arc<SlotTable>,
    vendors: VendorSet,
}

impl SnapshotPlatform {
    pub fn new(snapshot: HostSnapshot) -> Self {
        let table = Arc::new(SlotTable::new(snapshot.slots));
        let vendors = VendorSet::build(&snapshot.surfaces, table.clone());
        Self {
            sdk_level: snapshot.sdk_level,
            permission_granted: snapshot.permission_granted,
            fail_subscriptions: snapshot.fail_subscriptions,
            table,
            vendors,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(HostSnapshot::load(path)?))
    }
}

impl Platform for SnapshotPlatform {
    fn sdk_level(&self) -> u32 {
        self.sdk_level
    }

    fn resolve_class(&self, name: &str) -> std::result::Result<ClassRef, ProbeError> {
        self.vendors
            .class(name)
            .ok_or_else(|| ProbeError::ClassNotFound(name.to_string()))
    }

    fn system_service(&self, name: &str, slot: Option<i32>) -> Option<Handle> {
        self.vendors.service(name, slot)
    }

    fn active_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        if self.fail_subscriptions {
            return Err(MultiSimError::platform("subscription service unavailable"));
        }
        Ok(self
            .table
            .slots()
            .iter()
            .filter_map(SlotSnapshot::subscription)
            .collect())
    }

    fn is_network_roaming(&self, subscription_id: i32) -> bool {
        self.table
            .slots()
            .iter()
            .any(|s| s.subscription_id == subscription_id && s.roaming)
    }
}

impl PermissionGate for SnapshotPlatform {
    fn has_required_permission(&self) -> bool {
        self.permission_granted
    }
}

/// Fixed permission answer
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl PermissionGate for StaticPermission {
    fn has_required_permission(&self) -> bool {
        self.0
    }
}

/// In-process state-change listeners
///
/// Like the platform listener API, a new listener is called once right away
/// with the current state unless the instance is built with [`SnapshotEvents::manual`].
pub struct SnapshotEvents {
    listeners: Mutex<Vec<(ListenerId, StateCallback)>>,
    next_id: AtomicU64,
    replay_on_subscribe: bool,
    refuse_registration: AtomicBool,
}

impl SnapshotEvents {
    pub fn new() -> Self {
        Self::with_replay(true)
    }

    /// Listeners only run on [`SnapshotEvents::fire`]
    pub fn manual() -> Self {
        Self::with_replay(false)
    }

    fn with_replay(replay_on_subscribe: bool) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            replay_on_subscribe,
            refuse_registration: AtomicBool::new(false),
        }
    }

    /// Make subsequent registrations fail
    pub fn refuse_registration(&self, refuse: bool) {
        self.refuse_registration.store(refuse, Ordering::SeqCst);
    }

    /// Deliver a state change to every listener
    pub fn fire(&self) {
        let callbacks: Vec<StateCallback> = self.listeners.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for SnapshotEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEvents for SnapshotEvents {
    fn subscribe(&self, callback: StateCallback) -> Result<ListenerId> {
        if self.refuse_registration.load(Ordering::SeqCst) {
            return Err(MultiSimError::ListenerRegistration(
                "state listener refused".to_string(),
            ));
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, callback.clone()));
        if self.replay_on_subscribe {
            callback();
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|(listener, _)| *listener != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    const TWO_SIMS: &str = r#"{
        "sdk_level": 28,
        "surfaces": ["standard", "phone_factory"],
        "slots": [
            {"slot_index": 0, "subscription_id": 1, "state": "ready", "device_id": "35", "serial": "8901",
             "operator": "63902", "operator_name": "Safaricom", "country_iso": "ke"},
            {"slot_index": 1, "subscription_id": 2, "state": "ready", "device_id": "36", "serial": "8902",
             "operator": "310260", "roaming": true},
            {"slot_index": 2, "state": "absent"}
        ]
    }"#;

    #[test]
    fn test_parse_and_subscriptions() {
        let platform = SnapshotPlatform::new(HostSnapshot::from_json(TWO_SIMS).unwrap());
        assert!(platform.has_subscription_api());
        assert!(platform.has_required_permission());

        let subs = platform.active_subscriptions().unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!((subs[0].mcc.as_str(), subs[0].mnc.as_str()), ("639", "02"));
        assert_eq!((subs[1].mcc.as_str(), subs[1].mnc.as_str()), ("310", "260"));
        assert!(platform.is_network_roaming(2));
        assert!(!platform.is_network_roaming(1));
    }

    #[test]
    fn test_class_resolution() {
        let platform = SnapshotPlatform::new(HostSnapshot::from_json(TWO_SIMS).unwrap());
        assert!(platform.resolve_class("android.telephony.TelephonyManager").is_ok());
        assert!(platform.resolve_class("com.android.internal.telephony.PhoneFactory").is_ok());
        assert!(matches!(
            platform.resolve_class("android.telephony.MSimTelephonyManager"),
            Err(ProbeError::ClassNotFound(_))
        ));
        assert!(platform.system_service("phone", Some(1)).is_some());
        assert!(platform.system_service("phone_msim", None).is_none());
    }

    #[test]
    fn test_legacy_sdk_has_no_subscription_api() {
        let snapshot = HostSnapshot { sdk_level: 19, ..Default::default() };
        assert!(!SnapshotPlatform::new(snapshot).has_subscription_api());
    }

    #[test]
    fn test_failing_subscription_service() {
        let snapshot = HostSnapshot { fail_subscriptions: true, ..Default::default() };
        assert!(SnapshotPlatform::new(snapshot).active_subscriptions().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, TWO_SIMS).unwrap();
        assert_eq!(HostSnapshot::load(&path).unwrap().slots.len(), 3);
        assert!(HostSnapshot::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_events_replay_and_unsubscribe() {
        let events = SnapshotEvents::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = events
            .subscribe(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        events.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        events.unsubscribe(id);
        events.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(events.listener_count(), 0);
    }

    #[test]
    fn test_refused_registration() {
        let events = SnapshotEvents::manual();
        events.refuse_registration(true);
        assert!(matches!(
            events.subscribe(Arc::new(|| {})),
            Err(MultiSimError::ListenerRegistration(_))
        ));
    }
}
