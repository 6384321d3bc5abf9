//! Change detection and persistence
//!
//! Compares the canonical list of a pass with the last persisted one. Only a
//! real change writes to the store and notifies, and it notifies exactly once.

use tracing::{debug, info};

use crate::data::{SimRecord, SimStore};
use crate::display::redact_opt;
use crate::error::{MultiSimError, Result};
use crate::notify::{ErrorReporter, NotificationSink, SimEvent};

/// Result of comparing and persisting one canonical list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub changed: bool,
    /// Records written
    pub upserted: usize,
    /// Stored records newly marked removed
    pub removed: usize,
}

/// Whether `new_list` differs from `old_list`: no old list, a different
/// length, or any SIM that is new or sits in a different slot
pub fn has_changed(new_list: &[SimRecord], old_list: Option<&[SimRecord]>) -> bool {
    match old_list {
        None => {
            debug!(new = new_list.len(), "No saved list");
            true
        }
        Some(old) if old.len() != new_list.len() => {
            debug!(old = old.len(), new = new_list.len(), "SIM count differs");
            true
        }
        Some(old) => {
            let moved = new_list
                .iter()
                .any(|sim| sim.is_not_contained_in_or_has_moved(Some(old)));
            if moved {
                debug!("SIM added or moved");
            }
            moved
        }
    }
}

/// Compare, and on change persist `new_list` and publish one notification
pub fn reconcile(
    new_list: &[SimRecord],
    old_list: Option<&[SimRecord]>,
    store: &dyn SimStore,
    sink: &dyn NotificationSink,
    reporter: &dyn ErrorReporter,
) -> Result<ReconcileOutcome> {
    if !has_changed(new_list, old_list) {
        return Ok(ReconcileOutcome::default());
    }

    let mut outcome = ReconcileOutcome {
        changed: true,
        ..Default::default()
    };

    for sim in new_list {
        match store.upsert(sim) {
            Ok(()) => {
                info!(slot = sim.slot_index, sub_id = sim.subscription_id, sim = %sim, "Saved SIM");
                outcome.upserted += 1;
            }
            Err(e @ MultiSimError::MissingSerial { .. }) => reporter.capture("upsert", &e),
            Err(e) => return Err(e),
        }
    }

    for stored in store.get_all()? {
        if stored.is_removed() || !stored.is_not_contained_in(new_list) {
            continue;
        }
        info!(
            serial = %redact_opt(stored.serial_id.as_deref()),
            last_slot = stored.slot_index,
            "SIM no longer present, marking removed"
        );
        store.mark_removed(&stored)?;
        outcome.removed += 1;
    }

    sink.publish(SimEvent::SimListChanged {
        sim_count: new_list.len(),
    });
    Ok(outcome)
}
