//! Data types, validation and persistence
//!
//! Contains the SIM model and the stores that persist it.

mod persistence;
mod types;
mod validation;

pub use persistence::{JsonSimStore, MemoryStore, SimRow, SimStore, SimTable};
#[cfg(test)]
pub use persistence::MockSimStore;
pub use types::{SimRecord, SimState, SubscriptionInfo};
pub use validation::{
    country_code_from, network_code_from_hni, network_code_from_subscriber, non_blank,
    normalize_optional_serial, normalize_serial, split_hni,
};
