//! Unified error handling for multisim
//!
//! This crate provides a single error type used across all multisim components.
//! Probe-level failures never reach this type: they are absorbed at the accessor
//! boundary in `ms-core` and surface only as absent values.

use std::io;
use std::path::PathBuf;

/// Result type alias using MultiSimError
pub type Result<T> = std::result::Result<T, MultiSimError>;

/// Unified error type for all multisim operations
#[derive(thiserror::Error, Debug)]
pub enum MultiSimError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Store Errors
    // ============================================================================
    #[error("Cannot persist a SIM without a serial ID (slot {slot_index})")]
    MissingSerial {
        slot_index: i32,
    },

    #[error("SIM not found in store: {0}")]
    SimNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Platform and Reconciliation Errors
    // ============================================================================
    #[error("Required phone permission is not granted")]
    PermissionDenied,

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Failed to register SIM state listeners: {0}")]
    ListenerRegistration(String),

    #[error("Reconciliation pass faulted: {0}")]
    PassFault(String),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl MultiSimError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error from a string
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a platform error from a string
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a pass fault from a string
    pub fn fault(msg: impl Into<String>) -> Self {
        Self::PassFault(msg.into())
    }

    /// Whether a reconciliation pass that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermissionDenied)
    }
}

// Allow converting from String to MultiSimError
impl From<String> for MultiSimError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to MultiSimError
impl From<&str> for MultiSimError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
