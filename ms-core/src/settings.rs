//! Reconciliation configuration
//!
//! Stored as JSON at `<config dir>/multisim/config.json`. Every field has a
//! serde default so partial or older files still load; a missing file yields
//! the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{limits, paths, slots, timing};
use crate::engine::DedupPolicy;
use crate::error::{MultiSimError, Result};

/// Tunables for the reconciliation pass and its hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Slot indices probed per handle, `0..slot_count`
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,
    /// Pause after each pass before it completes
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Daemon period between scheduled passes
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
    /// Override for the SIM store location
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Override for the daemon socket
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// Host description consumed by the snapshot platform
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

fn default_slot_count() -> u32 {
    slots::DEFAULT_SLOT_COUNT
}

fn default_settle_delay_ms() -> u64 {
    timing::SETTLE_DELAY_MS
}

fn default_scan_interval_secs() -> u64 {
    timing::SCAN_INTERVAL_SECS
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            settle_delay_ms: default_settle_delay_ms(),
            scan_interval_secs: default_scan_interval_secs(),
            dedup_policy: DedupPolicy::default(),
            store_path: None,
            socket_path: None,
            snapshot_path: None,
        }
    }
}

impl ReconcileConfig {
    /// Reject values outside their accepted ranges
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 || self.slot_count > slots::MAX_SLOT_COUNT {
            return Err(MultiSimError::invalid_config(
                "slot_count",
                format!("must be between 1 and {}", slots::MAX_SLOT_COUNT),
            ));
        }
        if self.settle_delay_ms > timing::MAX_SETTLE_DELAY_MS {
            return Err(MultiSimError::invalid_config(
                "settle_delay_ms",
                format!("must not exceed {}", timing::MAX_SETTLE_DELAY_MS),
            ));
        }
        if self.scan_interval_secs < timing::MIN_SCAN_INTERVAL_SECS {
            return Err(MultiSimError::invalid_config(
                "scan_interval_secs",
                format!("must be at least {}", timing::MIN_SCAN_INTERVAL_SECS),
            ));
        }
        for (field, path) in [
            ("store_path", &self.store_path),
            ("socket_path", &self.socket_path),
            ("snapshot_path", &self.snapshot_path),
        ] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(MultiSimError::invalid_config(field, "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Store location: the override, else the per-user default
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(crate::data::JsonSimStore::default_path)
    }

    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(paths::default_socket_path()))
    }
}

/// Get the configuration file path (`~/.config/multisim/config.json`)
pub fn get_config_path() -> Result<PathBuf> {
    let dir = paths::user_config_dir()
        .ok_or_else(|| MultiSimError::config("Could not determine config directory"))?;
    Ok(dir.join(paths::CONFIG_FILE))
}

/// Load the configuration from the default location
pub fn load_config() -> Result<ReconcileConfig> {
    load_config_from(&get_config_path()?)
}

/// Load and validate a configuration file, defaults when it does not exist
pub fn load_config_from(path: &Path) -> Result<ReconcileConfig> {
    if !path.exists() {
        debug!(path = ?path, "No config file, using defaults");
        return Ok(ReconcileConfig::default());
    }

    let metadata = fs::metadata(path).map_err(|e| MultiSimError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.len() > limits::MAX_CONFIG_SIZE {
        return Err(MultiSimError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size: limits::MAX_CONFIG_SIZE,
        });
    }

    let content = fs::read_to_string(path).map_err(|e| MultiSimError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: ReconcileConfig = serde_json::from_str(&content)
        .map_err(|e| MultiSimError::config(format!("Failed to parse config JSON: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Validate and save a configuration to the default location
pub fn save_config(config: &ReconcileConfig) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(path: &Path, config: &ReconcileConfig) -> Result<()> {
    config.validate()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                MultiSimError::config(format!("Failed to create config directory: {}", e))
            })?;
        }
    }

    let json = serde_json::to_string_pretty(config)?;

    // CRITICAL: Atomic write - write to temp file then rename
    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path)
        .map_err(|e| MultiSimError::config(format!("Failed to create temp file: {}", e)))?;
    file.write_all(json.as_bytes())
        .map_err(|e| MultiSimError::config(format!("Failed to write to temp file: {}", e)))?;
    file.sync_all()
        .map_err(|e| MultiSimError::config(format!("Failed to sync temp file: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| MultiSimError::config(format!("Failed to rename temp file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.slot_count, 3);
        assert_eq!(config.settle_delay(), Duration::from_secs(5));
        assert_eq!(config.scan_interval(), Duration::from_secs(900));
        assert_eq!(config.dedup_policy, DedupPolicy::FirstSeen);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_path_follows_xdg() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        assert_eq!(
            get_config_path().unwrap(),
            dir.path().join("multisim").join("config.json")
        );
        assert_eq!(load_config().unwrap(), ReconcileConfig::default());
        std::env::remove_var("XDG_CONFIG_HOME");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ReconcileConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"slot_count": 2, "dedup_policy": "most_complete"}"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.slot_count, 2);
        assert_eq!(config.dedup_policy, DedupPolicy::MostComplete);
        assert_eq!(config.settle_delay_ms, 5000);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let bad = [
            ReconcileConfig { slot_count: 0, ..Default::default() },
            ReconcileConfig { slot_count: 9, ..Default::default() },
            ReconcileConfig { settle_delay_ms: 60_001, ..Default::default() },
            ReconcileConfig { scan_interval_secs: 59, ..Default::default() },
            ReconcileConfig { store_path: Some(PathBuf::new()), ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(MultiSimError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let config = ReconcileConfig {
            slot_count: 2,
            settle_delay_ms: 0,
            store_path: Some(dir.path().join("sims.json")),
            ..Default::default()
        };

        save_config_to(&path, &config).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
        assert_eq!(config.resolved_store_path(), dir.path().join("sims.json"));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"slot_count": 42}"#).unwrap();
        assert!(load_config_from(&path).is_err());

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(MultiSimError::Config(_))));
    }
}
