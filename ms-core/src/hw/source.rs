//! Validated slot candidates
//!
//! A [`SlotProbe`] is a handle/slot pairing that passed validation. It keeps
//! the handle so the remaining SIM fields can be read later through the
//! [`SimSource`] view.

use std::fmt;

use super::accessor::{probe, same_optional_handle, ClassRef, Handle, ProbeValue};
use crate::data::SimState;

/// Read access to one SIM as seen through a probing target
#[cfg_attr(test, mockall::automock)]
pub trait SimSource {
    fn slot_index(&self) -> i32;

    fn subscription_id(&self) -> i32;

    fn sim_state(&self) -> SimState;

    fn device_id(&self) -> Option<String>;

    /// Raw serial as reported; not yet normalized
    fn serial_id(&self) -> Option<String>;

    /// Read a textual field keyed by subscription id
    fn read_text(&self, method: &str) -> Option<String>;

    fn read_int(&self, method: &str) -> Option<i64>;

    fn read_bool(&self, method: &str) -> Option<bool>;
}

/// A handle × slot pairing whose state, device id and serial all resolved
#[derive(Clone)]
pub struct SlotProbe {
    slot_index: i32,
    subscription_id: i32,
    handle: Option<Handle>,
    class: Option<ClassRef>,
    /// Class the probes went through: the resolved class, else the handle's own
    class_name: Option<String>,
    sim_state: SimState,
    device_id: String,
    serial_id: String,
}

impl SlotProbe {
    pub fn new(
        slot_index: i32,
        subscription_id: i32,
        handle: Option<Handle>,
        class: Option<ClassRef>,
        sim_state: SimState,
        device_id: String,
        serial_id: String,
    ) -> Self {
        let class_name = class
            .as_ref()
            .map(|c| c.name().to_string())
            .or_else(|| handle.as_ref().map(|h| h.class_name().to_string()));
        Self {
            slot_index,
            subscription_id,
            handle,
            class,
            class_name,
            sim_state,
            device_id,
            serial_id,
        }
    }

    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Same device id through the same handle and class
    pub fn is_duplicate_of(&self, other: &SlotProbe) -> bool {
        self.device_id == other.device_id
            && same_optional_handle(self.handle.as_ref(), other.handle.as_ref())
            && self.class_name == other.class_name
    }

    /// True when no candidate in `list` duplicates this one
    pub fn is_unique_in(&self, list: &[SlotProbe]) -> bool {
        !list.iter().any(|other| self.is_duplicate_of(other))
    }

    fn read(&self, method: &str) -> Option<ProbeValue> {
        probe(self.handle.as_ref(), self.class.as_ref(), method, Some(self.subscription_id))
    }
}

impl SimSource for SlotProbe {
    fn slot_index(&self) -> i32 {
        self.slot_index
    }

    fn subscription_id(&self) -> i32 {
        self.subscription_id
    }

    fn sim_state(&self) -> SimState {
        self.sim_state
    }

    fn device_id(&self) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn serial_id(&self) -> Option<String> {
        Some(self.serial_id.clone())
    }

    fn read_text(&self, method: &str) -> Option<String> {
        self.read(method).and_then(|v| v.as_text())
    }

    fn read_int(&self, method: &str) -> Option<i64> {
        self.read(method).and_then(|v| v.as_int())
    }

    fn read_bool(&self, method: &str) -> Option<bool> {
        self.read(method).and_then(|v| v.as_bool())
    }
}

impl fmt::Debug for SlotProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotProbe")
            .field("slot_index", &self.slot_index)
            .field("subscription_id", &self.subscription_id)
            .field("class_name", &self.class_name)
            .field("sim_state", &self.sim_state)
            .finish_non_exhaustive()
    }
}
