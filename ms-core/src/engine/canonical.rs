//! Canonical list building
//!
//! Turns validated candidates and subscription-API records into one list of
//! SIM records with at most one entry per serial ID.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::probing::methods;
use crate::data::{
    country_code_from, network_code_from_hni, network_code_from_subscriber, non_blank,
    normalize_optional_serial, SimRecord, SimState, SubscriptionInfo,
};
use crate::display::redact_opt;
use crate::hw::SimSource;

/// Which record survives when several describe the same SIM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the first record seen. Order-dependent: candidates come before
    /// subscription records.
    #[default]
    FirstSeen,
    /// Keep the record with the most populated fields, in the position of the
    /// first one seen; ties go to the first
    MostComplete,
}

/// Read a full record from a validated candidate
pub fn record_from_source(source: &dyn SimSource) -> SimRecord {
    let mut record = SimRecord::new(
        source.slot_index(),
        source.subscription_id(),
        normalize_optional_serial(source.serial_id().as_deref()),
    );
    record.sim_state = source.sim_state();
    record.device_id = non_blank(source.device_id());

    let text = |method: &str| non_blank(source.read_text(method));
    record.subscriber_id = text(methods::SUBSCRIBER_ID);
    record.hni = text(methods::SIM_OPERATOR);
    record.country_code = record
        .subscriber_id
        .as_deref()
        .and_then(country_code_from)
        .or_else(|| record.hni.as_deref().and_then(country_code_from));
    record.network_code = record
        .hni
        .as_deref()
        .and_then(network_code_from_hni)
        .or_else(|| record.subscriber_id.as_deref().and_then(network_code_from_subscriber));
    record.operator_name = text(methods::SIM_OPERATOR_NAME);
    record.country_iso = text(methods::SIM_COUNTRY_ISO);
    record.network_operator_code = text(methods::NETWORK_OPERATOR);
    record.network_operator_name = text(methods::NETWORK_OPERATOR_NAME);
    record.network_country_iso = text(methods::NETWORK_COUNTRY_ISO);
    record.network_type = source
        .read_int(methods::NETWORK_TYPE)
        .and_then(|t| i32::try_from(t).ok());
    record.is_roaming = source.read_bool(methods::NETWORK_ROAMING).unwrap_or(false);
    record
}

/// Build a record from a subscription-API entry.
///
/// Codes come from the subscription's MCC/MNC; the subscriber id and HNI are
/// both set to MCC + MNC since the API does not expose the IMSI.
pub fn record_from_subscription(info: &SubscriptionInfo, is_roaming: bool) -> SimRecord {
    let mut record = SimRecord::new(
        info.slot_index,
        info.subscription_id,
        normalize_optional_serial(info.icc_id.as_deref()),
    );
    let mcc = non_blank(Some(info.mcc.clone()));
    let mnc = non_blank(Some(info.mnc.clone()));
    let hni = match (&mcc, &mnc) {
        (Some(mcc), Some(mnc)) => Some(format!("{}{}", mcc, mnc)),
        _ => None,
    };
    record.country_code = mcc;
    record.network_code = mnc;
    record.subscriber_id = hni.clone();
    record.hni = hni;
    record.sim_state = SimState::Unknown;
    record.operator_name = non_blank(info.carrier_name.clone());
    record.country_iso = non_blank(info.country_iso.clone());
    record.is_roaming = is_roaming;
    record
}

/// Collapse records sharing a serial ID according to `policy`.
///
/// Records without a serial are never equal to anything and are all kept.
pub fn remove_duplicates(records: Vec<SimRecord>, policy: DedupPolicy) -> Vec<SimRecord> {
    let mut unique: Vec<SimRecord> = Vec::with_capacity(records.len());
    for record in records {
        match unique.iter().position(|kept| kept.is_same_sim(&record)) {
            None => unique.push(record),
            Some(i) => {
                if policy == DedupPolicy::MostComplete
                    && record.completeness() > unique[i].completeness()
                {
                    unique[i] = record;
                }
            }
        }
    }
    unique
}

/// Build the canonical list for one pass.
///
/// Candidate records first, deduplicated; then, when the subscription API
/// returned anything, its records appended and the whole list deduplicated
/// again. Subscription records without a serial are dropped since they cannot
/// be matched against the store.
pub fn build<S: SimSource>(
    candidates: &[S],
    subscriptions: &[SubscriptionInfo],
    is_roaming: &dyn Fn(i32) -> bool,
    policy: DedupPolicy,
) -> Vec<SimRecord> {
    let records: Vec<SimRecord> = candidates
        .iter()
        .map(|c| record_from_source(c))
        .collect();
    let mut list = remove_duplicates(records, policy);

    if !subscriptions.is_empty() {
        for info in subscriptions {
            let record = record_from_subscription(info, is_roaming(info.subscription_id));
            if record.serial_id.is_none() {
                debug!(slot = info.slot_index, sub_id = info.subscription_id, "Subscription without serial skipped");
                continue;
            }
            list.push(record);
        }
        list = remove_duplicates(list, policy);
    }

    for record in &list {
        debug!(
            slot = record.slot_index,
            sub_id = record.subscription_id,
            serial = %redact_opt(record.serial_id.as_deref()),
            "Canonical SIM"
        );
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MockSimSource;
    use mockall::predicate::eq;

    fn source(slot: i32, sub: i32, serial: &str, operator: Option<&'static str>) -> MockSimSource {
        let mut mock = MockSimSource::new();
        mock.expect_slot_index().return_const(slot);
        mock.expect_subscription_id().return_const(sub);
        mock.expect_sim_state().return_const(SimState::Ready);
        mock.expect_device_id().return_const(Some("356938035643809".to_string()));
        mock.expect_serial_id().return_const(Some(serial.to_string()));
        mock.expect_read_text()
            .with(eq(methods::SUBSCRIBER_ID))
            .return_const(Some("639021234567890".to_string()));
        mock.expect_read_text()
            .with(eq(methods::SIM_OPERATOR_NAME))
            .return_const(operator.map(String::from));
        mock.expect_read_text().return_const(None::<String>);
        mock.expect_read_int().return_const(Some(13i64));
        mock.expect_read_bool().return_const(Some(false));
        mock
    }

    fn subscription(slot: i32, sub: i32, icc_id: Option<&str>) -> SubscriptionInfo {
        SubscriptionInfo {
            subscription_id: sub,
            slot_index: slot,
            mcc: "639".to_string(),
            mnc: "02".to_string(),
            icc_id: icc_id.map(String::from),
            carrier_name: Some("Safaricom".to_string()),
            country_iso: Some("ke".to_string()),
        }
    }

    #[test]
    fn test_record_from_source_reads_all_fields() {
        let record = record_from_source(&source(1, 2, "8925-4021A", Some("Safaricom")));
        assert_eq!(record.slot_index, 1);
        assert_eq!(record.serial_id.as_deref(), Some("89254021"));
        assert_eq!(record.country_code.as_deref(), Some("639"));
        assert_eq!(record.network_code.as_deref(), Some("02"));
        assert_eq!(record.operator_name.as_deref(), Some("Safaricom"));
        assert_eq!(record.network_type, Some(13));
        assert!(!record.is_roaming);
    }

    #[test]
    fn test_record_from_subscription_keeps_leading_zeros() {
        let record = record_from_subscription(&subscription(0, 5, Some("8901-26")), true);
        assert_eq!(record.serial_id.as_deref(), Some("890126"));
        assert_eq!(record.hni.as_deref(), Some("63902"));
        assert_eq!(record.network_code.as_deref(), Some("02"));
        assert_eq!(record.sim_state, SimState::Unknown);
        assert!(record.is_roaming);
    }

    #[test]
    fn test_equal_serials_keep_first() {
        let list = build(
            &[
                source(0, 1, "111", Some("First")),
                source(1, 2, "111", Some("Second")),
                source(1, 2, "222", None),
            ],
            &[],
            &|_| false,
            DedupPolicy::FirstSeen,
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].operator_name.as_deref(), Some("First"));
        assert_eq!(list[0].slot_index, 0);
    }

    #[test]
    fn test_subscriptions_appended_then_deduped() {
        let list = build(
            &[source(0, 1, "111", Some("Probe"))],
            &[subscription(0, 1, Some("111")), subscription(1, 2, Some("222")), subscription(2, 3, None)],
            &|_| false,
            DedupPolicy::FirstSeen,
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].operator_name.as_deref(), Some("Probe"));
        assert_eq!(list[1].serial_id.as_deref(), Some("222"));
    }

    #[test]
    fn test_most_complete_policy() {
        let sparse = SimRecord::new(1, 2, Some("111".to_string()));
        let mut rich = SimRecord::new(0, 1, Some("111".to_string()));
        rich.device_id = Some("35".to_string());
        rich.operator_name = Some("Airtel".to_string());
        let other = SimRecord::new(2, 3, Some("333".to_string()));

        let first = remove_duplicates(vec![sparse.clone(), other.clone(), rich.clone()], DedupPolicy::FirstSeen);
        assert_eq!(first, vec![sparse.clone(), other.clone()]);

        let complete = remove_duplicates(vec![sparse, other.clone(), rich.clone()], DedupPolicy::MostComplete);
        assert_eq!(complete, vec![rich, other]);
    }

    #[test]
    fn test_records_without_serial_are_all_kept() {
        let list = remove_duplicates(
            vec![SimRecord::new(0, 1, None), SimRecord::new(1, 2, None)],
            DedupPolicy::FirstSeen,
        );
        assert_eq!(list.len(), 2);
    }
}
