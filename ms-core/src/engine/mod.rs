//! Reconciliation engine
//!
//! Enumeration, validation, canonical list building, change detection and the
//! coordinator and worker sessions that run them.

mod canonical;
mod coordinator;
mod enumerate;
mod reconcile;
mod registry;
mod validator;
mod worker;

pub use canonical::{build, record_from_source, record_from_subscription, remove_duplicates, DedupPolicy};
pub use coordinator::{Collaborators, Coordinator, PassOutcome, PassState, PassStats};
pub use enumerate::{enumerate_handles, pair_with_subscriptions, Enumeration};
pub use reconcile::{has_changed, reconcile, ReconcileOutcome};
pub use registry::CapabilityRegistry;
pub use validator::{add_valid_ready_slots, validate};
pub use worker::{Completion, Session, Worker};
