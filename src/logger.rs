/*
 * This file is part of multisim.
 *
 * Copyright (C) 2025 multisim contributors
 *
 * multisim is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * multisim is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with multisim. If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-lines event log
//!
//! One object per line: `{"ts_ms", "event", "data"}`. Used by `--logging` runs
//! of the CLI as both the error reporter and the change notification sink.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

use ms_core::constants::paths;
use ms_core::{ErrorReporter, MultiSimError, NotificationSink, SimEvent};

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// `<config dir>/multisim/logs.json`
pub fn default_log_path() -> PathBuf {
    paths::user_config_dir()
        .map(|dir| dir.join(paths::EVENT_LOG_FILE))
        .unwrap_or_else(|| PathBuf::from(paths::FALLBACK_EVENT_LOG))
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Open the event log, falling back to /tmp when `path` is unwritable
pub fn init_logging(path: &Path) {
    let file = open_append(path).or_else(|_| open_append(Path::new(paths::FALLBACK_EVENT_LOG)));
    if let (Ok(f), Ok(mut guard)) = (file, LOG_FILE.lock()) {
        *guard = Some(f);
    }
}

/// Close the event log; later events are dropped
pub fn shutdown_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = None;
    }
}

pub fn log_event(event: &str, data: Value) {
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(f) = guard.as_mut() {
            let _ = writeln!(f, "{}", line);
        }
    }
}

/// Writes captured errors and list changes to the event log
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLog;

impl ErrorReporter for EventLog {
    fn capture(&self, context: &str, error: &MultiSimError) {
        tracing::warn!(context, error = %error, "Captured error");
        log_event(
            "error",
            json!({
                "context": context,
                "error": error.to_string(),
                "retryable": error.is_retryable(),
            }),
        );
    }
}

impl NotificationSink for EventLog {
    fn publish(&self, event: SimEvent) {
        let data = serde_json::to_value(&event).unwrap_or(Value::Null);
        log_event(event.action(), data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    #[serial]
    fn test_events_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("logs.json");
        init_logging(&path);

        log_event("startup", json!({ "mode": "cli" }));
        EventLog.publish(SimEvent::SimListChanged { sim_count: 2 });
        EventLog.capture("upsert", &MultiSimError::MissingSerial { slot_index: 1 });
        shutdown_logging();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "startup");
        assert_eq!(lines[1]["event"], "sim-list-changed");
        assert_eq!(lines[1]["data"]["sim_count"], 2);
        assert_eq!(lines[2]["data"]["context"], "upsert");
        assert!(lines[2]["ts_ms"].as_u64().is_some());
    }

    #[test]
    #[serial]
    fn test_events_dropped_when_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        init_logging(&path);
        shutdown_logging();

        log_event("ignored", json!({}));
        assert!(fs::read_to_string(&path).unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_default_path_follows_xdg() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        assert_eq!(default_log_path(), dir.path().join("multisim").join("logs.json"));
        std::env::remove_var("XDG_CONFIG_HOME");
    }
}
