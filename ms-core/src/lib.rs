//! Multisim Core Library
//!
//! Discovers the SIM cards of a multi-SIM device through redundant vendor
//! telephony surfaces, reconciles them into one canonical list keyed by serial
//! ID, persists it and notifies dependents once per real change.
//!
//! # Module Structure
//!
//! - `hw/` - Method-name probing on telephony handles, validated slot candidates
//! - `platform/` - Host capability traits and the snapshot-backed host
//! - `data/` - SIM model, identifier normalization, stores
//! - `engine/` - Enumeration, validation, dedup, change detection, coordinator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ms_core::{
//!     Collaborators, Coordinator, MemoryStore, ReconcileConfig, SnapshotPlatform,
//!     TracingReporter, TracingSink,
//! };
//!
//! let platform = Arc::new(SnapshotPlatform::load("host.json".as_ref()).unwrap());
//! let coordinator = Coordinator::new(
//!     ReconcileConfig::default(),
//!     Collaborators {
//!         platform: platform.clone(),
//!         permission: platform,
//!         store: Arc::new(MemoryStore::new()),
//!         sink: Arc::new(TracingSink),
//!         reporter: Arc::new(TracingReporter),
//!     },
//! );
//! let outcome = coordinator.run_pass();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;
pub mod platform;

// Standalone modules
pub mod constants;
pub mod display;
pub mod error;
pub mod notify;
pub mod settings;

// Re-export primary types from data/
pub use data::{
    normalize_serial, JsonSimStore, MemoryStore, SimRecord, SimState, SimStore, SubscriptionInfo,
};

// Re-export error types
pub use error::{MultiSimError, Result};

// Re-export engine types
pub use engine::{
    CapabilityRegistry, Collaborators, Coordinator, DedupPolicy, PassOutcome, PassState,
    PassStats, Session, Worker,
};

// Re-export probing types
pub use hw::{ProbeError, ProbeValue, SimSource, SlotProbe, TelephonyHandle, VendorClass};

// Re-export platform types
pub use platform::{
    HostSnapshot, PermissionGate, Platform, SnapshotEvents, SnapshotPlatform, StateEvents,
    StaticPermission, VendorSurface,
};

// Re-export notification types
pub use notify::{ChannelSink, ErrorReporter, NotificationSink, SimEvent, TracingReporter, TracingSink};

// Re-export settings
pub use settings::{get_config_path, load_config, load_config_from, save_config, ReconcileConfig};

// Re-export display helpers
pub use display::{format_sim_line, format_slot, redact};
