//! Change notifications and error reporting
//!
//! Both are fire-and-forget: a sink or reporter that cannot deliver drops the
//! message rather than failing the pass.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use tracing::{info, warn};

use crate::constants::events;
use crate::error::MultiSimError;

/// Events published to dependents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// The canonical SIM list changed and has been persisted
    SimListChanged { sim_count: usize },
}

impl SimEvent {
    /// Action name dependents filter on
    pub fn action(&self) -> &'static str {
        match self {
            Self::SimListChanged { .. } => events::SIM_LIST_CHANGED,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: SimEvent);
}

/// Best-effort error capture. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn capture(&self, context: &str, error: &MultiSimError);
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: SimEvent) {
        info!(action = event.action(), ?event, "SIM list changed");
    }
}

/// Forwards events over a channel; a closed receiver drops them
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Sender<SimEvent>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<SimEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: SimEvent) {
        let _ = self.tx.lock().send(event);
    }
}

/// Reports errors as warnings
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, context: &str, error: &MultiSimError) {
        warn!(context, error = %error, "Captured error");
    }
}
