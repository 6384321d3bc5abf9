//! Vendor telephony surfaces
//!
//! One adapter per known surface, each answering only the method names and
//! argument conventions that surface really has:
//!
//! | Surface        | Class                                         | Arguments                 |
//! |----------------|-----------------------------------------------|---------------------------|
//! | `standard`     | `android.telephony.TelephonyManager`          | slot or subscription id   |
//! | `msim`         | `android.telephony.MSimTelephonyManager`      | slot, always required     |
//! | `mediatek`     | `com.mediatek.telephony.TelephonyManagerEx`   | slot, `Gemini` names only |
//! | `phone_factory`| `com.android.internal.telephony.PhoneFactory` | none, one phone per slot  |

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::snapshot::SlotSnapshot;
use crate::constants::probing::{methods, FACTORY_METHOD};
use crate::hw::{ClassRef, Handle, ProbeError, ProbeResult, ProbeValue, TelephonyHandle, VendorClass};

pub const TELEPHONY_MANAGER: &str = "android.telephony.TelephonyManager";
pub const MSIM_TELEPHONY_MANAGER: &str = "android.telephony.MSimTelephonyManager";
pub const MEDIATEK_TELEPHONY_MANAGER: &str = "com.mediatek.telephony.TelephonyManagerEx";
pub const PHONE_FACTORY: &str = "com.android.internal.telephony.PhoneFactory";
pub const PHONE: &str = "com.android.internal.telephony.Phone";

const SERVICE_PHONE: &str = "phone";
const SERVICE_PHONE_MSIM: &str = "phone_msim";
const GEMINI: &str = "Gemini";

/// A vendor telephony surface a host may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorSurface {
    Standard,
    Msim,
    Mediatek,
    PhoneFactory,
}

/// Slot contents shared by every adapter of one host
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Vec<SlotSnapshot>,
}

impl SlotTable {
    pub(crate) fn new(slots: Vec<SlotSnapshot>) -> Self {
        Self { slots }
    }

    pub(crate) fn slots(&self) -> &[SlotSnapshot] {
        &self.slots
    }

    fn by_slot(&self, slot_index: i32) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|s| s.slot_index == slot_index)
    }

    fn by_subscription(&self, subscription_id: i32) -> Option<&SlotSnapshot> {
        self.slots
            .iter()
            .find(|s| s.subscription_id >= 0 && s.subscription_id == subscription_id)
    }

    /// Lowest-indexed slot; answers argument-less calls on the default manager
    fn default_slot(&self) -> Option<&SlotSnapshot> {
        self.slots.iter().min_by_key(|s| s.slot_index)
    }
}

/// Methods whose argument is a slot index on surfaces that also take subscription ids
fn is_slot_keyed(base: &str) -> bool {
    matches!(base, methods::SIM_STATE | methods::DEVICE_ID | methods::IMEI)
}

/// Value of a SIM field, or `NoSuchMethod` when no surface has that method
fn field(slot: Option<&SlotSnapshot>, base: &str) -> ProbeResult {
    let text = |v: &Option<String>| v.clone().map(ProbeValue::Text);
    let Some(slot) = slot else {
        return if is_known_method(base) {
            Ok(None)
        } else {
            Err(ProbeError::NoSuchMethod(base.to_string()))
        };
    };
    let value = match base {
        methods::SIM_STATE => Some(ProbeValue::Int(slot.state.code())),
        methods::DEVICE_ID | methods::IMEI => text(&slot.device_id),
        methods::SERIAL => text(&slot.serial),
        methods::SUBSCRIBER_ID => text(&slot.subscriber_id),
        methods::SIM_OPERATOR => text(&slot.operator),
        methods::SIM_OPERATOR_NAME => text(&slot.operator_name),
        methods::SIM_COUNTRY_ISO => text(&slot.country_iso),
        methods::NETWORK_OPERATOR => text(&slot.network_operator),
        methods::NETWORK_OPERATOR_NAME => text(&slot.network_operator_name),
        methods::NETWORK_COUNTRY_ISO => text(&slot.network_country_iso),
        methods::NETWORK_TYPE => slot.network_type.map(|t| ProbeValue::Int(t as i64)),
        methods::NETWORK_ROAMING => Some(ProbeValue::Bool(slot.roaming)),
        other => return Err(ProbeError::NoSuchMethod(other.to_string())),
    };
    Ok(value)
}

fn is_known_method(base: &str) -> bool {
    matches!(
        base,
        methods::SIM_STATE
            | methods::DEVICE_ID
            | methods::IMEI
            | methods::SERIAL
            | methods::SUBSCRIBER_ID
            | methods::SIM_OPERATOR
            | methods::SIM_OPERATOR_NAME
            | methods::SIM_COUNTRY_ISO
            | methods::NETWORK_OPERATOR
            | methods::NETWORK_OPERATOR_NAME
            | methods::NETWORK_COUNTRY_ISO
            | methods::NETWORK_TYPE
            | methods::NETWORK_ROAMING
    )
}

fn no_such_method(method: &str) -> ProbeResult {
    Err(ProbeError::NoSuchMethod(method.to_string()))
}

// ============================================================================
// Standard
// ============================================================================

/// The platform telephony manager: slot-keyed state and device id, everything
/// else keyed by subscription id; argument-less calls answer for the default slot
struct StandardManager {
    table: Arc<SlotTable>,
}

impl TelephonyHandle for StandardManager {
    fn class_name(&self) -> &str {
        TELEPHONY_MANAGER
    }

    fn invoke(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        let slot = match arg {
            None => self.table.default_slot(),
            Some(i) if is_slot_keyed(method) => self.table.by_slot(i),
            Some(id) => self.table.by_subscription(id),
        };
        field(slot, method)
    }
}

// ============================================================================
// Qualcomm MSim
// ============================================================================

/// Every method takes a slot index; there are no argument-less overloads
struct MsimManager {
    table: Arc<SlotTable>,
}

impl TelephonyHandle for MsimManager {
    fn class_name(&self) -> &str {
        MSIM_TELEPHONY_MANAGER
    }

    fn invoke(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        match arg {
            Some(slot) => field(self.table.by_slot(slot), method),
            None => no_such_method(method),
        }
    }
}

// ============================================================================
// MediaTek Gemini
// ============================================================================

/// Only `...Gemini(slot)` names exist
struct GeminiManager {
    table: Arc<SlotTable>,
}

impl TelephonyHandle for GeminiManager {
    fn class_name(&self) -> &str {
        MEDIATEK_TELEPHONY_MANAGER
    }

    fn invoke(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        match (method.strip_suffix(GEMINI), arg) {
            (Some(base), Some(slot)) => field(self.table.by_slot(slot), base),
            _ => no_such_method(method),
        }
    }
}

// ============================================================================
// Per-slot phone factory
// ============================================================================

/// One phone object per slot; its argument-less methods describe that slot
struct SlotPhone {
    slot_index: i32,
    table: Arc<SlotTable>,
}

impl TelephonyHandle for SlotPhone {
    fn class_name(&self) -> &str {
        PHONE
    }

    fn invoke(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        match arg {
            None => field(self.table.by_slot(self.slot_index), method),
            Some(_) => no_such_method(method),
        }
    }
}

// ============================================================================
// Classes
// ============================================================================

/// A class whose `getDefault()` returns a single shared manager
struct SingletonClass {
    name: &'static str,
    instance: Handle,
}

impl VendorClass for SingletonClass {
    fn name(&self) -> &str {
        self.name
    }

    fn invoke_static(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        match (method, arg) {
            (FACTORY_METHOD, None) => Ok(Some(ProbeValue::Handle(self.instance.clone()))),
            _ => no_such_method(method),
        }
    }
}

/// `PhoneFactory.getDefault(slot)`; without a slot it returns the first phone
struct PhoneFactoryClass {
    phones: Vec<(i32, Handle)>,
}

impl PhoneFactoryClass {
    fn phone(&self, slot_index: i32) -> Option<Handle> {
        self.phones
            .iter()
            .find(|(slot, _)| *slot == slot_index)
            .map(|(_, phone)| phone.clone())
    }
}

impl VendorClass for PhoneFactoryClass {
    fn name(&self) -> &str {
        PHONE_FACTORY
    }

    fn invoke_static(&self, method: &str, arg: Option<i32>) -> ProbeResult {
        if method != FACTORY_METHOD {
            return no_such_method(method);
        }
        let phone = match arg {
            Some(slot) => self.phone(slot),
            None => self.phones.first().map(|(_, phone)| phone.clone()),
        };
        Ok(phone.map(ProbeValue::Handle))
    }
}

/// The phone interface: instance methods only
struct PhoneClass;

impl VendorClass for PhoneClass {
    fn name(&self) -> &str {
        PHONE
    }

    fn invoke_static(&self, method: &str, _arg: Option<i32>) -> ProbeResult {
        no_such_method(method)
    }
}

// ============================================================================
// Host wiring
// ============================================================================

/// The resolved classes and services of one host
pub(crate) struct VendorSet {
    classes: Vec<ClassRef>,
    standard: Option<Handle>,
    msim: Option<Handle>,
    phones: Option<Arc<PhoneFactoryClass>>,
}

impl VendorSet {
    pub(crate) fn build(surfaces: &[VendorSurface], table: Arc<SlotTable>) -> Self {
        let mut set = Self {
            classes: Vec::new(),
            standard: None,
            msim: None,
            phones: None,
        };

        for surface in surfaces {
            match surface {
                VendorSurface::Standard if set.standard.is_none() => {
                    let instance: Handle = Arc::new(StandardManager { table: table.clone() });
                    set.classes.push(Arc::new(SingletonClass {
                        name: TELEPHONY_MANAGER,
                        instance: instance.clone(),
                    }));
                    set.standard = Some(instance);
                }
                VendorSurface::Msim if set.msim.is_none() => {
                    let instance: Handle = Arc::new(MsimManager { table: table.clone() });
                    set.classes.push(Arc::new(SingletonClass {
                        name: MSIM_TELEPHONY_MANAGER,
                        instance: instance.clone(),
                    }));
                    set.msim = Some(instance);
                }
                VendorSurface::Mediatek if set.class(MEDIATEK_TELEPHONY_MANAGER).is_none() => {
                    set.classes.push(Arc::new(SingletonClass {
                        name: MEDIATEK_TELEPHONY_MANAGER,
                        instance: Arc::new(GeminiManager { table: table.clone() }),
                    }));
                }
                VendorSurface::PhoneFactory if set.phones.is_none() => {
                    let mut slots: Vec<i32> = table.slots().iter().map(|s| s.slot_index).collect();
                    slots.sort_unstable();
                    slots.dedup();
                    let phones = slots
                        .into_iter()
                        .map(|slot_index| {
                            let phone: Handle = Arc::new(SlotPhone {
                                slot_index,
                                table: table.clone(),
                            });
                            (slot_index, phone)
                        })
                        .collect();
                    let factory = Arc::new(PhoneFactoryClass { phones });
                    set.classes.push(factory.clone());
                    set.classes.push(Arc::new(PhoneClass));
                    set.phones = Some(factory);
                }
                _ => {}
            }
        }
        set
    }

    pub(crate) fn class(&self, name: &str) -> Option<ClassRef> {
        self.classes.iter().find(|c| c.name() == name).cloned()
    }

    /// `phone` is the standard manager, `phone` with a slot the per-slot phone,
    /// `phone_msim` the MSim manager
    pub(crate) fn service(&self, name: &str, slot: Option<i32>) -> Option<Handle> {
        match (name, slot) {
            (SERVICE_PHONE, None) => self.standard.clone(),
            (SERVICE_PHONE, Some(i)) => self.phones.as_ref().and_then(|f| f.phone(i)),
            (SERVICE_PHONE_MSIM, None) => self.msim.clone(),
            _ => None,
        }
    }
}
