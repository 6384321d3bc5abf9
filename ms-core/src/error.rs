//! Error types, re-exported from `ms-error`

pub use ms_error::{MultiSimError, Result};
