//! SIM persistence
//!
//! The store is a table of SIM rows with a unique key on the serial ID. Rows are
//! updated in place on every changed pass and never hard-deleted: a SIM that is
//! no longer observed is marked removed (slot -1).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::{limits, paths};
use crate::data::types::SimRecord;
use crate::data::validation::split_hni;
use crate::display::redact;
use crate::error::{MultiSimError, Result};

/// Row store consumed by the change detector
///
/// Implementations must keep at most one row per serial ID.
#[cfg_attr(test, mockall::automock)]
pub trait SimStore: Send + Sync {
    /// The SIM currently recorded in `slot_index`, if any
    fn get_by_slot(&self, slot_index: i32) -> Result<Option<SimRecord>>;

    fn get_by_serial_id(&self, serial_id: &str) -> Result<Option<SimRecord>>;

    /// Every row, removed ones included, in insertion order
    fn get_all(&self) -> Result<Vec<SimRecord>>;

    /// Insert or replace the row with the record's serial ID
    fn upsert(&self, record: &SimRecord) -> Result<()>;

    /// Logically delete the row with the record's serial ID
    fn mark_removed(&self, record: &SimRecord) -> Result<()>;

    /// SIMs still in a slot that belong to the network `hni` (MCC + MNC)
    fn present_by_hni(&self, hni: &str) -> Result<Vec<SimRecord>> {
        let Some((mcc, mnc)) = split_hni(hni) else {
            return Ok(Vec::new());
        };
        let Ok(mnc) = mnc.parse::<u32>() else {
            return Ok(Vec::new());
        };
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|r| r.slot_index >= 0 && r.country_code.as_deref() == Some(mcc.as_str()))
            .filter(|r| r.is_mnc_match(mnc))
            .collect())
    }

    /// Last subscription id recorded for a SIM
    fn subscription_id_for(&self, serial_id: &str) -> Result<Option<i32>> {
        Ok(self.get_by_serial_id(serial_id)?.map(|r| r.subscription_id))
    }

    /// The last persisted canonical list: one row per slot in `0..slot_count`
    fn saved_list(&self, slot_count: u32) -> Result<Vec<SimRecord>> {
        let mut saved = Vec::new();
        for slot in 0..slot_count as i32 {
            if let Some(record) = self.get_by_slot(slot)? {
                saved.push(record);
            }
        }
        Ok(saved)
    }
}

// ============================================================================
// Table
// ============================================================================

/// One persisted SIM with bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRow {
    pub id: u64,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(flatten)]
    pub record: SimRecord,
}

/// The persisted document shared by the in-memory and JSON stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTable {
    /// Format version for migration
    pub version: u32,
    pub next_id: u64,
    pub rows: Vec<SimRow>,
}

impl SimTable {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            next_id: 1,
            rows: Vec::new(),
        }
    }

    fn find(&self, serial_id: &str) -> Option<&SimRow> {
        self.rows
            .iter()
            .find(|row| row.record.serial_id.as_deref() == Some(serial_id))
    }

    fn find_mut(&mut self, serial_id: &str) -> Option<&mut SimRow> {
        self.rows
            .iter_mut()
            .find(|row| row.record.serial_id.as_deref() == Some(serial_id))
    }

    /// Most recently updated row in the slot
    pub fn by_slot(&self, slot_index: i32) -> Option<SimRecord> {
        self.rows
            .iter()
            .filter(|row| row.record.slot_index == slot_index)
            .max_by_key(|row| (row.updated_at, row.id))
            .map(|row| row.record.clone())
    }

    pub fn by_serial(&self, serial_id: &str) -> Option<SimRecord> {
        self.find(serial_id).map(|row| row.record.clone())
    }

    pub fn all(&self) -> Vec<SimRecord> {
        self.rows.iter().map(|row| row.record.clone()).collect()
    }

    pub fn upsert(&mut self, record: &SimRecord) -> Result<()> {
        let serial = record
            .serial_id
            .as_deref()
            .ok_or(MultiSimError::MissingSerial { slot_index: record.slot_index })?;
        let now = current_timestamp_ms();

        if let Some(row) = self.find_mut(serial) {
            row.record = record.clone();
            row.updated_at = now;
            return Ok(());
        }

        let id = self.next_id;
        self.next_id += 1;
        self.rows.push(SimRow {
            id,
            created_at: now,
            updated_at: now,
            record: record.clone(),
        });
        Ok(())
    }

    pub fn mark_removed(&mut self, record: &SimRecord) -> Result<()> {
        let serial = record
            .serial_id
            .as_deref()
            .ok_or(MultiSimError::MissingSerial { slot_index: record.slot_index })?;
        let row = self
            .find_mut(serial)
            .ok_or_else(|| MultiSimError::SimNotFound(redact(serial)))?;
        row.record.mark_removed();
        row.updated_at = current_timestamp_ms();
        Ok(())
    }

    fn migrate(mut self) -> Self {
        // Version 1 is the first format; later migrations go here
        self.version = Self::CURRENT_VERSION;
        self
    }
}

impl Default for SimTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, used by tests and one-shot CLI scans
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<SimTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing rows
    pub fn with_records(records: &[SimRecord]) -> Result<Self> {
        let mut table = SimTable::new();
        for record in records {
            table.upsert(record)?;
        }
        Ok(Self { table: RwLock::new(table) })
    }
}

impl SimStore for MemoryStore {
    fn get_by_slot(&self, slot_index: i32) -> Result<Option<SimRecord>> {
        Ok(self.table.read().by_slot(slot_index))
    }

    fn get_by_serial_id(&self, serial_id: &str) -> Result<Option<SimRecord>> {
        Ok(self.table.read().by_serial(serial_id))
    }

    fn get_all(&self) -> Result<Vec<SimRecord>> {
        Ok(self.table.read().all())
    }

    fn upsert(&self, record: &SimRecord) -> Result<()> {
        self.table.write().upsert(record)
    }

    fn mark_removed(&self, record: &SimRecord) -> Result<()> {
        self.table.write().mark_removed(record)
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Store persisted as a single JSON document, rewritten atomically on every change
#[derive(Debug)]
pub struct JsonSimStore {
    path: PathBuf,
    table: RwLock<SimTable>,
}

impl JsonSimStore {
    /// Default location: `<config dir>/multisim/sims.json`
    pub fn default_path() -> PathBuf {
        paths::user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(paths::APP_DIR))
            .join(paths::STORE_FILE)
    }

    /// Open the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = load_table(&path)?;
        info!(path = ?path, sims = table.rows.len(), "Opened SIM store");
        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut SimTable) -> Result<()>,
    {
        let mut table = self.table.write();
        let mut next = table.clone();
        change(&mut next)?;
        save_table(&self.path, &next)?;
        *table = next;
        Ok(())
    }
}

impl SimStore for JsonSimStore {
    fn get_by_slot(&self, slot_index: i32) -> Result<Option<SimRecord>> {
        Ok(self.table.read().by_slot(slot_index))
    }

    fn get_by_serial_id(&self, serial_id: &str) -> Result<Option<SimRecord>> {
        Ok(self.table.read().by_serial(serial_id))
    }

    fn get_all(&self) -> Result<Vec<SimRecord>> {
        Ok(self.table.read().all())
    }

    fn upsert(&self, record: &SimRecord) -> Result<()> {
        self.mutate(|table| table.upsert(record))
    }

    fn mark_removed(&self, record: &SimRecord) -> Result<()> {
        self.mutate(|table| table.mark_removed(record))
    }
}

fn load_table(path: &Path) -> Result<SimTable> {
    if !path.exists() {
        debug!(path = ?path, "No SIM store found, starting empty");
        return Ok(SimTable::new());
    }

    // SECURITY: Check file size before reading
    let metadata = fs::metadata(path).map_err(|e| MultiSimError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.len() > limits::MAX_STORE_SIZE {
        return Err(MultiSimError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size: limits::MAX_STORE_SIZE,
        });
    }

    let content = fs::read_to_string(path).map_err(|e| MultiSimError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let table: SimTable = serde_json::from_str(&content)?;

    if table.version < SimTable::CURRENT_VERSION {
        warn!(
            old_version = table.version,
            new_version = SimTable::CURRENT_VERSION,
            "Migrating SIM store"
        );
        return Ok(table.migrate());
    }
    Ok(table)
}

fn save_table(path: &Path, table: &SimTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(table)?;

    // CRITICAL: Atomic write - write to temp file then rename
    let temp_path = path.with_extension("json.tmp");
    let write_err = |e| MultiSimError::FileWrite {
        path: temp_path.clone(),
        source: e,
    };
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| MultiSimError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!(path = ?path, rows = table.rows.len(), "Saved SIM store");
    Ok(())
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
