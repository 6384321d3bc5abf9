//! Host platform capabilities
//!
//! Everything the reconciliation core needs from the host: class and service
//! lookup for probing, the subscription API, the permission check and the
//! state-change listeners that drive worker sessions.

mod snapshot;
mod vendors;

pub use snapshot::{HostSnapshot, SlotSnapshot, SnapshotEvents, SnapshotPlatform, StaticPermission};
pub use vendors::VendorSurface;

use std::sync::Arc;

use crate::constants::platform::SUBSCRIPTION_API_MIN_SDK;
use crate::data::SubscriptionInfo;
use crate::error::Result;
use crate::hw::{ClassRef, Handle, ProbeError};

/// Introspectable telephony state of the host
pub trait Platform: Send + Sync {
    /// Platform SDK level
    fn sdk_level(&self) -> u32;

    /// Resolve a vendor class by fully-qualified name
    fn resolve_class(&self, name: &str) -> std::result::Result<ClassRef, ProbeError>;

    /// Look up a system service, optionally for one slot
    fn system_service(&self, name: &str, slot: Option<i32>) -> Option<Handle>;

    /// Active subscriptions. Only called when [`Platform::has_subscription_api`] holds.
    fn active_subscriptions(&self) -> Result<Vec<SubscriptionInfo>>;

    fn is_network_roaming(&self, subscription_id: i32) -> bool;

    fn has_subscription_api(&self) -> bool {
        self.sdk_level() >= SUBSCRIPTION_API_MIN_SDK
    }
}

/// Whether the process may read phone state
#[cfg_attr(test, mockall::automock)]
pub trait PermissionGate: Send + Sync {
    fn has_required_permission(&self) -> bool;
}

/// Callback fired on SIM-state broadcasts and service-state changes
pub type StateCallback = Arc<dyn Fn() + Send + Sync>;

/// Registration token returned by [`StateEvents::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Source of state-change notifications
pub trait StateEvents: Send + Sync {
    fn subscribe(&self, callback: StateCallback) -> Result<ListenerId>;

    fn unsubscribe(&self, id: ListenerId);
}
