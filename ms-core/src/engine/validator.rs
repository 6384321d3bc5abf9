//! Slot validation
//!
//! A handle/slot pairing becomes a candidate only when the SIM state reads
//! `Ready` and both the device id and the serial resolve.

use tracing::trace;

use super::registry::CapabilityRegistry;
use crate::constants::probing::methods;
use crate::data::{normalize_optional_serial, SimState};
use crate::hw::{probe, ClassRef, Handle, SlotProbe};
use crate::platform::Platform;

/// Resolve the probing class: the named class when it resolves, else none
/// (the handle's own class)
fn probing_class(platform: &dyn Platform, class_name: Option<&str>) -> Option<ClassRef> {
    class_name.and_then(|name| platform.resolve_class(name).ok())
}

/// Validate one handle × slot pairing through one class
pub fn validate(
    platform: &dyn Platform,
    slot_index: i32,
    subscription_id: i32,
    handle: Option<&Handle>,
    class_name: Option<&str>,
) -> Option<SlotProbe> {
    let class = probing_class(platform, class_name);

    let sim_state = probe(handle, class.as_ref(), methods::SIM_STATE, Some(slot_index))?
        .as_int()
        .map(SimState::from_code)
        .unwrap_or(SimState::Unknown);

    let device_id = probe(handle, class.as_ref(), methods::DEVICE_ID, Some(slot_index))
        .or_else(|| probe(handle, class.as_ref(), methods::IMEI, Some(slot_index)))
        .and_then(|v| v.as_text());

    // A serial with no digits left after normalization cannot key a record
    let serial_id = probe(handle, class.as_ref(), methods::SERIAL, Some(subscription_id))
        .and_then(|v| v.as_text())
        .and_then(|raw| normalize_optional_serial(Some(&raw)));

    match (sim_state, device_id, serial_id) {
        (SimState::Ready, Some(device_id), Some(serial_id)) => Some(SlotProbe::new(
            slot_index,
            subscription_id,
            handle.cloned(),
            class,
            sim_state,
            device_id,
            serial_id,
        )),
        (state, device_id, serial_id) => {
            trace!(
                slot = slot_index,
                sub_id = subscription_id,
                class = class_name.unwrap_or("-"),
                ?state,
                has_device_id = device_id.is_some(),
                has_serial = serial_id.is_some(),
                "Slot not ready"
            );
            None
        }
    }
}

/// Validate a handle against every registered class name and keep the
/// candidates not already accumulated
pub fn add_valid_ready_slots(
    platform: &dyn Platform,
    registry: &CapabilityRegistry,
    accumulated: &mut Vec<SlotProbe>,
    slot_index: i32,
    subscription_id: i32,
    handle: Option<&Handle>,
) {
    for class_name in registry.class_names() {
        if handle.is_none() && class_name.is_none() {
            continue;
        }
        if let Some(candidate) = validate(platform, slot_index, subscription_id, handle, class_name.as_deref()) {
            if candidate.is_unique_in(accumulated) {
                accumulated.push(candidate);
            }
        }
    }
}
