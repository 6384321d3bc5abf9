//! Display helpers
//!
//! Hardware identifiers (serial, device id, subscriber id) never reach logs or
//! socket output in clear text; they are shown as a short SHA-256 digest.

use sha2::{Digest, Sha256};

use crate::constants::limits;
use crate::data::SimRecord;

/// Short stable digest of an identifier, e.g. `"#3f9a01bc"`
pub fn redact(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("#{}", &hex[..limits::REDACTED_DIGEST_LEN])
}

pub fn redact_opt(identifier: Option<&str>) -> String {
    identifier.map(redact).unwrap_or_else(|| "-".to_string())
}

/// Human-readable slot label, 1-based; removed SIMs have none
pub fn format_slot(slot_index: i32) -> String {
    if slot_index < 0 {
        "removed".to_string()
    } else {
        format!("SIM {}", slot_index + 1)
    }
}

/// One table line for a record, identifiers redacted
pub fn format_sim_line(record: &SimRecord) -> String {
    format!(
        "{:<8} {:<10} {:<24} {:<6} {:<6} {}",
        format_slot(record.slot_index),
        redact_opt(record.serial_id.as_deref()),
        record.operator_name.as_deref().unwrap_or("-"),
        record.hni.as_deref().unwrap_or("-"),
        record.country_iso.as_deref().map(str::to_uppercase).unwrap_or_else(|| "-".to_string()),
        if record.is_roaming { "roaming" } else { "" }
    )
    .trim_end()
    .to_string()
}
