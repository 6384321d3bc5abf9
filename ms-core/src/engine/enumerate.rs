//! Candidate enumeration
//!
//! Collects every telephony-manager-like handle the host exposes: `getDefault`
//! on each known vendor class (without and then with each slot index), then each
//! known system service the same way, then a terminal `None` for static-only
//! access. Handles are kept once by identity.
//!
//! Without the subscription API each new handle is validated on the spot; with
//! it, validation waits for [`pair_with_subscriptions`].

use tracing::debug;

use super::registry::CapabilityRegistry;
use super::validator::add_valid_ready_slots;
use crate::constants::probing::{FACTORY_METHOD, KNOWN_CLASS_NAMES, KNOWN_SERVICE_NAMES};
use crate::data::SubscriptionInfo;
use crate::hw::{same_handle, Handle, ProbeError, SlotProbe};
use crate::platform::Platform;

/// Handles found by one enumeration, plus the candidates validated on the way
#[derive(Default)]
pub struct Enumeration {
    /// Distinct handles in discovery order, ending with `None`
    pub handles: Vec<Option<Handle>>,
    pub candidates: Vec<SlotProbe>,
}

impl Enumeration {
    fn contains(&self, handle: &Handle) -> bool {
        self.handles
            .iter()
            .flatten()
            .any(|known| same_handle(known, handle))
    }
}

struct Enumerator<'a> {
    platform: &'a dyn Platform,
    registry: &'a mut CapabilityRegistry,
    slot_count: u32,
    validate_eagerly: bool,
    found: Enumeration,
}

impl Enumerator<'_> {
    fn slots(&self) -> impl Iterator<Item = i32> {
        0..self.slot_count as i32
    }

    fn add_from_class(&mut self, class_name: &str, slot: Option<i32>) {
        let class = match self.platform.resolve_class(class_name) {
            Ok(class) => class,
            Err(ProbeError::ClassNotFound(_)) => {
                self.registry.prune(class_name);
                return;
            }
            Err(_) => return,
        };
        let handle = class
            .invoke_static(FACTORY_METHOD, slot)
            .ok()
            .flatten()
            .and_then(|value| value.into_handle());
        if let Some(handle) = handle {
            if self.add(handle, slot) {
                debug!(class = class_name, ?slot, "Added manager from {}", FACTORY_METHOD);
            }
        }
    }

    fn add_from_service(&mut self, service: &str, slot: Option<i32>) {
        if let Some(handle) = self.platform.system_service(service, slot) {
            if self.add(handle, slot) {
                debug!(service, ?slot, "Added manager from system service");
            }
        }
    }

    /// Record a handle once; on the legacy path validate it right away
    fn add(&mut self, handle: Handle, slot: Option<i32>) -> bool {
        if self.found.contains(&handle) {
            return false;
        }
        self.found.handles.push(Some(handle.clone()));

        if self.validate_eagerly {
            let targets: Vec<i32> = match slot {
                Some(slot) => vec![slot],
                None => self.slots().collect(),
            };
            for slot in targets {
                add_valid_ready_slots(
                    self.platform,
                    self.registry,
                    &mut self.found.candidates,
                    slot,
                    slot,
                    Some(&handle),
                );
            }
        }
        true
    }

    fn run(mut self) -> Enumeration {
        for class_name in KNOWN_CLASS_NAMES.iter().flatten() {
            self.add_from_class(class_name, None);
            for slot in self.slots() {
                self.add_from_class(class_name, Some(slot));
            }
        }
        for service in KNOWN_SERVICE_NAMES {
            self.add_from_service(service, None);
            for slot in self.slots() {
                self.add_from_service(service, Some(slot));
            }
        }
        self.found.handles.push(None);
        self.found
    }
}

/// Enumerate every distinct handle the host exposes for `0..slot_count`
pub fn enumerate_handles(
    platform: &dyn Platform,
    registry: &mut CapabilityRegistry,
    slot_count: u32,
) -> Enumeration {
    registry.ensure_seeded();
    let validate_eagerly = !platform.has_subscription_api();
    let enumeration = Enumerator {
        platform,
        registry,
        slot_count,
        validate_eagerly,
        found: Enumeration::default(),
    }
    .run();
    debug!(
        handles = enumeration.handles.len(),
        candidates = enumeration.candidates.len(),
        "Enumerated telephony handles"
    );
    enumeration
}

/// Validate every enumerated handle against every active subscription
pub fn pair_with_subscriptions(
    platform: &dyn Platform,
    registry: &CapabilityRegistry,
    enumeration: &mut Enumeration,
    subscriptions: &[SubscriptionInfo],
) {
    let handles = enumeration.handles.clone();
    for handle in &handles {
        for sub in subscriptions {
            add_valid_ready_slots(
                platform,
                registry,
                &mut enumeration.candidates,
                sub.slot_index,
                sub.subscription_id,
                handle.as_ref(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SimState;
    use crate::hw::SimSource;
    use crate::platform::{HostSnapshot, SlotSnapshot, SnapshotPlatform, VendorSurface};

    fn sim(slot_index: i32, subscription_id: i32, serial: &str) -> SlotSnapshot {
        SlotSnapshot {
            subscription_id,
            state: SimState::Ready,
            device_id: Some(format!("35000000000000{}", slot_index)),
            serial: Some(serial.to_string()),
            ..SlotSnapshot::empty(slot_index)
        }
    }

    fn platform(sdk_level: u32, surfaces: Vec<VendorSurface>) -> SnapshotPlatform {
        SnapshotPlatform::new(HostSnapshot {
            sdk_level,
            surfaces,
            slots: vec![sim(0, 1, "8901"), sim(1, 2, "8902")],
            ..Default::default()
        })
    }

    #[test]
    fn test_handles_are_distinct_and_end_with_none() {
        let platform = platform(30, vec![VendorSurface::Standard, VendorSurface::Msim]);
        let mut registry = CapabilityRegistry::new();
        let found = enumerate_handles(&platform, &mut registry, 3);

        // TelephonyManager and MSim singletons; services return the same objects
        assert_eq!(found.handles.len(), 3);
        assert!(found.handles.last().unwrap().is_none());
        assert!(found.candidates.is_empty());
    }

    #[test]
    fn test_missing_classes_are_pruned() {
        let platform = platform(30, vec![VendorSurface::Standard]);
        let mut registry = CapabilityRegistry::new();
        enumerate_handles(&platform, &mut registry, 3);

        assert!(registry.contains("android.telephony.TelephonyManager"));
        assert!(!registry.contains("android.telephony.MSimTelephonyManager"));
        assert!(!registry.contains("com.mediatek.telephony.TelephonyManagerEx"));
        assert_eq!(registry.class_names()[0], None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_legacy_path_validates_during_enumeration() {
        let platform = platform(19, vec![VendorSurface::PhoneFactory]);
        let mut registry = CapabilityRegistry::new();
        let found = enumerate_handles(&platform, &mut registry, 3);

        // phone0 and phone1, each found once
        assert_eq!(found.handles.len(), 3);
        let mut serials: Vec<(i32, String)> = found
            .candidates
            .iter()
            .map(|c| (c.slot_index(), c.serial_id().unwrap()))
            .collect();
        serials.sort();
        assert_eq!(serials, vec![(0, "8901".to_string()), (1, "8902".to_string())]);
    }

    #[test]
    fn test_modern_path_pairs_with_subscriptions() {
        let platform = platform(30, vec![VendorSurface::Standard]);
        let mut registry = CapabilityRegistry::new();
        let mut found = enumerate_handles(&platform, &mut registry, 3);
        let subs = platform.active_subscriptions().unwrap();
        pair_with_subscriptions(&platform, &registry, &mut found, &subs);

        let pairs: Vec<(i32, i32, String)> = found
            .candidates
            .iter()
            .map(|c| (c.slot_index(), c.subscription_id(), c.serial_id().unwrap()))
            .collect();
        assert_eq!(pairs, vec![(0, 1, "8901".to_string()), (1, 2, "8902".to_string())]);
    }
}
