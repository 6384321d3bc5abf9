//! Telephony surface access
//!
//! Contains the method-name prober and the candidate view built on top of it.

mod accessor;
mod source;

pub use accessor::{
    probe, same_handle, same_optional_handle, ClassRef, Handle, ProbeError, ProbeResult,
    ProbeValue, TelephonyHandle, VendorClass,
};
#[cfg(test)]
pub use source::MockSimSource;
pub use source::{SimSource, SlotProbe};
