//! Capability probing on vendor telephony surfaces
//!
//! Hosts expose SIM information through a standard telephony manager plus a
//! zoo of vendor variants whose method names differ by a suffix
//! (`getSimStateGemini`, `getSimSerialNumberDs`, ...). A surface is modelled
//! as a [`VendorClass`] (static methods, `getDefault` factories) whose
//! instances are [`TelephonyHandle`]s. [`probe`] sweeps the known suffixes and
//! turns every invocation failure into absence.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::constants::probing::METHOD_SUFFIXES;

/// Shared handle to a telephony-manager-like object
pub type Handle = Arc<dyn TelephonyHandle>;

/// Shared reference to a resolved vendor class
pub type ClassRef = Arc<dyn VendorClass>;

/// Value returned by a probed method
#[derive(Clone)]
pub enum ProbeValue {
    Int(i64),
    Text(String),
    Bool(bool),
    /// Factory methods return new handles
    Handle(Handle),
}

impl ProbeValue {
    /// Textual reading; integers are rendered in decimal
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Integer reading; text is parsed when it holds a plain number
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Self::Handle(h) => Some(h),
            _ => None,
        }
    }
}

impl fmt::Debug for ProbeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "Int({})", i),
            Self::Text(s) => write!(f, "Text({:?})", s),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Handle(h) => write!(f, "Handle({})", h.class_name()),
        }
    }
}

/// Why a single invocation produced nothing. Never escapes [`probe`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("No method {0}")]
    NoSuchMethod(String),

    #[error("Access to {0} denied")]
    Access(String),

    #[error("Receiver of class {actual} is not a {expected}")]
    WrongReceiver { expected: String, actual: String },

    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Method faulted: {0}")]
    Fault(String),

    #[error("No handle or class to invoke on")]
    NoTarget,
}

pub type ProbeResult = std::result::Result<Option<ProbeValue>, ProbeError>;

/// An instance of a telephony surface
pub trait TelephonyHandle: Send + Sync {
    /// Name of the class this handle is an instance of
    fn class_name(&self) -> &str;

    /// Invoke an instance method with an optional single int argument
    fn invoke(&self, method: &str, arg: Option<i32>) -> ProbeResult;
}

/// A resolvable telephony surface class
pub trait VendorClass: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke a static method
    fn invoke_static(&self, method: &str, arg: Option<i32>) -> ProbeResult;

    /// Invoke one of this class's instance methods on `receiver`
    fn invoke_on(&self, receiver: &dyn TelephonyHandle, method: &str, arg: Option<i32>) -> ProbeResult {
        if receiver.class_name() != self.name() {
            return Err(ProbeError::WrongReceiver {
                expected: self.name().to_string(),
                actual: receiver.class_name().to_string(),
            });
        }
        receiver.invoke(method, arg)
    }
}

/// Identity comparison of two handles
pub fn same_handle(a: &Handle, b: &Handle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Identity comparison of two optional handles; two absent handles are equal
pub fn same_optional_handle(a: Option<&Handle>, b: Option<&Handle>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_handle(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn invoke_once(
    handle: Option<&Handle>,
    class: Option<&ClassRef>,
    method: &str,
    arg: Option<i32>,
) -> ProbeResult {
    match (class, handle) {
        (Some(class), Some(handle)) => class.invoke_on(handle.as_ref(), method, arg),
        (Some(class), None) => class.invoke_static(method, arg),
        (None, Some(handle)) => handle.invoke(method, arg),
        (None, None) => Err(ProbeError::NoTarget),
    }
}

fn sweep(handle: Option<&Handle>, class: Option<&ClassRef>, base: &str, arg: Option<i32>) -> Option<ProbeValue> {
    for suffix in METHOD_SUFFIXES {
        let method = format!("{}{}", base, suffix);
        match invoke_once(handle, class, &method, arg) {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => trace!(method = %method, ?arg, error = %e, "Probe miss"),
        }
    }
    None
}

/// Look a value up by method-name probing.
///
/// Tries `base + suffix` for every known suffix with `arg`, then the whole
/// sweep again without an argument. The first present value wins; failures
/// count as absence. Invokes on `handle` through `class` when both are given,
/// statically on `class` when there is no handle, and on the handle's own
/// class when there is no class.
pub fn probe(handle: Option<&Handle>, class: Option<&ClassRef>, base: &str, arg: Option<i32>) -> Option<ProbeValue> {
    if base.is_empty() {
        return None;
    }
    sweep(handle, class, base, arg).or_else(|| {
        if arg.is_some() {
            sweep(handle, class, base, None)
        } else {
            None
        }
    })
}
