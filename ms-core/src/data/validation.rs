//! Identifier normalization and parsing
//!
//! Serial IDs are the only identity key for a physical SIM, so every path that
//! produces one (slot probing, subscription API, store) goes through
//! [`normalize_serial`].

use regex::Regex;
use std::sync::OnceLock;

static NON_DIGIT: OnceLock<Regex> = OnceLock::new();

fn non_digit() -> &'static Regex {
    // The pattern is a literal, compilation cannot fail
    NON_DIGIT.get_or_init(|| Regex::new(r"[^0-9]").expect("non-digit pattern is valid"))
}

/// Strip every non-digit character from a raw serial ID.
///
/// `"8901-26A-2022"` becomes `"8901262022"`. Normalizing twice is a no-op.
pub fn normalize_serial(raw: &str) -> String {
    non_digit().replace_all(raw, "").into_owned()
}

/// Normalize an optional serial; an empty result counts as absent
pub fn normalize_optional_serial(raw: Option<&str>) -> Option<String> {
    raw.map(normalize_serial).filter(|s| !s.is_empty())
}

/// Country code: the first three digits of a subscriber id or HNI
pub fn country_code_from(id: &str) -> Option<String> {
    let mcc = id.get(0..3)?;
    mcc.chars().all(|c| c.is_ascii_digit()).then(|| mcc.to_string())
}

/// Network code: the digits following the country code of an HNI (2 or 3 digits)
pub fn network_code_from_hni(hni: &str) -> Option<String> {
    let mnc = hni.get(3..)?;
    let valid = (2..=3).contains(&mnc.len()) && mnc.chars().all(|c| c.is_ascii_digit());
    valid.then(|| mnc.to_string())
}

/// Network code from a subscriber id alone. The MNC length is not encoded in
/// the IMSI, so the common 2-digit reading is used.
pub fn network_code_from_subscriber(imsi: &str) -> Option<String> {
    let mnc = imsi.get(3..5)?;
    mnc.chars().all(|c| c.is_ascii_digit()).then(|| mnc.to_string())
}

/// Split an HNI such as `"63902"` into `("639", "02")`
pub fn split_hni(hni: &str) -> Option<(String, String)> {
    Some((country_code_from(hni)?, network_code_from_hni(hni)?))
}

/// Treat blank strings reported by the host as absent
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_non_digits() {
        assert_eq!(normalize_serial("8901-26A-2022"), "8901262022");
        assert_eq!(normalize_serial("89254021234567890F"), "89254021234567890");
        assert_eq!(normalize_serial(" 89 01 "), "8901");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["8901-26A-2022", "abc", "", "0000", "8925\u{00e9}40"] {
            let once = normalize_serial(raw);
            assert_eq!(normalize_serial(&once), once);
        }
    }

    #[test]
    fn test_optional_serial_empty_is_absent() {
        assert_eq!(normalize_optional_serial(Some("FFFF")), None);
        assert_eq!(normalize_optional_serial(None), None);
        assert_eq!(normalize_optional_serial(Some("89-1")), Some("891".to_string()));
    }

    #[test]
    fn test_codes() {
        assert_eq!(country_code_from("639020123"), Some("639".to_string()));
        assert_eq!(country_code_from("63"), None);
        assert_eq!(country_code_from("ab902"), None);
        assert_eq!(network_code_from_hni("63902"), Some("02".to_string()));
        assert_eq!(network_code_from_hni("310260"), Some("260".to_string()));
        assert_eq!(network_code_from_hni("6390"), None);
        assert_eq!(network_code_from_subscriber("639020123"), Some("02".to_string()));
        assert_eq!(split_hni("63907"), Some(("639".to_string(), "07".to_string())));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(Some(" ke ".to_string())), Some("ke".to_string()));
    }
}
