//! Core data types for multisim
//!
//! `SimRecord` is the canonical representation of one physical SIM. Records are
//! built transiently on every pass and persisted keyed by their serial ID.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::slots;

/// SIM card state as reported by the host telephony surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimState {
    Unknown,
    Absent,
    PinRequired,
    PukRequired,
    NetworkLocked,
    Ready,
    /// Persisted-only: the SIM was not observed by the latest changed pass
    Removed,
}

impl SimState {
    /// Map a platform state code. Codes outside the known range map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Absent,
            2 => Self::PinRequired,
            3 => Self::PukRequired,
            4 => Self::NetworkLocked,
            5 => Self::Ready,
            _ => Self::Unknown,
        }
    }

    /// Platform state code; `Removed` has no platform equivalent and maps to -1
    pub fn code(&self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Absent => 1,
            Self::PinRequired => 2,
            Self::PukRequired => 3,
            Self::NetworkLocked => 4,
            Self::Ready => 5,
            Self::Removed => -1,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == Self::Ready
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// One physical SIM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRecord {
    /// Physical slot, starting from 0. -1 once the SIM has been removed.
    pub slot_index: i32,
    /// Platform subscription id. The same SIM may get a new id after reinsertion.
    pub subscription_id: i32,
    /// Normalized hardware serial (ICC ID). Sole identity of a physical SIM.
    pub serial_id: Option<String>,
    pub device_id: Option<String>,
    /// IMSI, or only its leading MCC+MNC digits on some hosts
    pub subscriber_id: Option<String>,
    pub country_code: Option<String>,
    pub network_code: Option<String>,
    /// Home network identifier as reported by the host. Prefer the subscriber id.
    pub hni: Option<String>,
    pub sim_state: SimState,
    pub operator_name: Option<String>,
    pub country_iso: Option<String>,
    pub network_operator_code: Option<String>,
    pub network_operator_name: Option<String>,
    pub network_country_iso: Option<String>,
    pub network_type: Option<i32>,
    #[serde(default)]
    pub is_roaming: bool,
}

impl SimRecord {
    /// A record with only identity fields set
    pub fn new(slot_index: i32, subscription_id: i32, serial_id: Option<String>) -> Self {
        Self {
            slot_index,
            subscription_id,
            serial_id,
            device_id: None,
            subscriber_id: None,
            country_code: None,
            network_code: None,
            hni: None,
            sim_state: SimState::Unknown,
            operator_name: None,
            country_iso: None,
            network_operator_code: None,
            network_operator_name: None,
            network_country_iso: None,
            network_type: None,
            is_roaming: false,
        }
    }

    /// Two records describe the same physical SIM iff both serials are present and equal
    pub fn is_same_sim(&self, other: &SimRecord) -> bool {
        match (&self.serial_id, &other.serial_id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_same_sim_in_same_slot(&self, other: &SimRecord) -> bool {
        self.is_same_sim(other) && self.slot_index == other.slot_index
    }

    pub fn is_not_contained_in(&self, records: &[SimRecord]) -> bool {
        !records.iter().any(|r| self.is_same_sim(r))
    }

    /// True when no record in `records` is this SIM in this slot
    pub fn is_not_contained_in_or_has_moved(&self, records: Option<&[SimRecord]>) -> bool {
        match records {
            None => true,
            Some(records) => !records.iter().any(|r| self.is_same_sim_in_same_slot(r)),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.sim_state == SimState::Removed
    }

    /// Logical deletion: the row is kept, only slot and state change
    pub fn mark_removed(&mut self) {
        self.slot_index = slots::REMOVED_SLOT_INDEX;
        self.sim_state = SimState::Removed;
    }

    /// Number of populated descriptive fields
    pub fn completeness(&self) -> usize {
        let optional = [
            &self.serial_id,
            &self.device_id,
            &self.subscriber_id,
            &self.country_code,
            &self.network_code,
            &self.hni,
            &self.operator_name,
            &self.country_iso,
            &self.network_operator_code,
            &self.network_operator_name,
            &self.network_country_iso,
        ];
        let mut score = optional.iter().filter(|f| f.is_some()).count();
        if self.network_type.is_some() {
            score += 1;
        }
        if self.sim_state != SimState::Unknown {
            score += 1;
        }
        if self.slot_index >= 0 {
            score += 1;
        }
        score
    }

    /// Whether the MNC in the subscriber id equals `mnc`.
    ///
    /// A 4-digit subscriber id carries a 1-digit tail; otherwise both the
    /// 2-digit and the 3-digit reading are tried.
    pub fn is_mnc_match(&self, mnc: u32) -> bool {
        let Some(imsi) = self.subscriber_id.as_deref() else {
            return false;
        };
        let parse = |s: Option<&str>| s.and_then(|v| v.parse::<u32>().ok());
        (imsi.len() == 4 && parse(imsi.get(3..)) == Some(mnc))
            || (imsi.len() >= 5 && parse(imsi.get(3..5)) == Some(mnc))
            || (imsi.len() >= 6 && parse(imsi.get(3..6)) == Some(mnc))
    }

    /// Pick the HNI from `candidates` that this SIM belongs to, rebuilt from the
    /// subscriber id's country code and the matched MNC
    pub fn interpreted_hni<S: AsRef<str>>(&self, candidates: &[S]) -> Option<String> {
        let imsi = self.subscriber_id.as_deref()?;
        let mcc = imsi.get(0..3)?;
        for candidate in candidates {
            let Some(mnc) = candidate.as_ref().get(3..).and_then(|m| m.parse::<u32>().ok()) else {
                continue;
            };
            if self.is_mnc_match(mnc) {
                return Some(format!("{}{}", mcc, mnc));
            }
        }
        None
    }
}

impl fmt::Display for SimRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (SIM {})",
            self.operator_name.as_deref().unwrap_or("Unknown"),
            self.country_iso.as_deref().map(str::to_uppercase).unwrap_or_default(),
            self.slot_index + 1
        )
    }
}

/// One active subscription as reported by the platform subscription API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub subscription_id: i32,
    pub slot_index: i32,
    /// Mobile country code, kept as text so leading zeros survive
    pub mcc: String,
    /// Mobile network code, kept as text so leading zeros survive
    pub mnc: String,
    pub icc_id: Option<String>,
    pub carrier_name: Option<String>,
    pub country_iso: Option<String>,
}
