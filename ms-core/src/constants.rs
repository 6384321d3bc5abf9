//! Constants and configuration values for multisim
//!
//! Centralizes all magic numbers, names, paths and configuration defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Name of the per-user configuration directory
    pub const APP_DIR: &str = "multisim";

    /// Reconciliation configuration file
    pub const CONFIG_FILE: &str = "config.json";

    /// Persisted SIM list
    pub const STORE_FILE: &str = "sims.json";

    /// JSON-lines event log written by the CLI
    pub const EVENT_LOG_FILE: &str = "logs.json";

    /// Event log used when the config directory is unavailable
    pub const FALLBACK_EVENT_LOG: &str = "/tmp/multisim_logs.json";

    /// Default daemon socket when /run exists
    pub const SOCKET_RUN: &str = "/run/multisim.sock";

    /// Fallback daemon socket
    pub const SOCKET_VAR_RUN: &str = "/var/run/multisim.sock";

    /// User configuration directory (`$XDG_CONFIG_HOME/multisim` or platform default)
    pub fn user_config_dir() -> Option<std::path::PathBuf> {
        let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            Some(std::path::PathBuf::from(xdg))
        } else {
            dirs::config_dir()
        };
        base.map(|p| p.join(APP_DIR))
    }

    /// Default socket path for the current host
    pub fn default_socket_path() -> &'static str {
        if std::path::Path::new("/run").exists() {
            SOCKET_RUN
        } else {
            SOCKET_VAR_RUN
        }
    }
}

/// Slot enumeration
pub mod slots {
    /// Slots probed per handle. Need to check 0, 1 and 2: some devices index from 1.
    pub const DEFAULT_SLOT_COUNT: u32 = 3;

    /// Upper bound accepted from configuration
    pub const MAX_SLOT_COUNT: u32 = 8;

    /// Slot index written to a record that is no longer observed
    pub const REMOVED_SLOT_INDEX: i32 = -1;

    /// Subscription id for records that never had one
    pub const NO_SUBSCRIPTION_ID: i32 = -1;
}

/// Host platform capability thresholds
pub mod platform {
    /// First SDK level exposing the subscription API
    pub const SUBSCRIPTION_API_MIN_SDK: u32 = 22;
}

/// Names probed on vendor telephony surfaces
pub mod probing {
    /// Method-name suffixes tried in order by the accessor
    pub const METHOD_SUFFIXES: &[&str] = &["", "Gemini", "Ext", "Ds", "ForSubscription", "ForPhone"];

    /// Vendor class names tried for a `getDefault` factory. The leading `None` is the
    /// "use the handle's own class" sentinel and is skipped during enumeration.
    pub const KNOWN_CLASS_NAMES: &[Option<&str>] = &[
        None,
        Some("android.telephony.TelephonyManager"),
        Some("android.telephony.MSimTelephonyManager"),
        Some("android.telephony.MultiSimTelephonyService"),
        Some("com.mediatek.telephony.TelephonyManagerEx"),
        Some("com.android.internal.telephony.Phone"),
        Some("com.android.internal.telephony.PhoneFactory"),
    ];

    /// System services looked up with and without a slot index
    pub const KNOWN_SERVICE_NAMES: &[&str] = &["phone", "phone_msim"];

    /// Static factory invoked on every resolved vendor class
    pub const FACTORY_METHOD: &str = "getDefault";

    pub mod methods {
        pub const SIM_STATE: &str = "getSimState";
        pub const DEVICE_ID: &str = "getDeviceId";
        pub const IMEI: &str = "getImei";
        pub const SERIAL: &str = "getSimSerialNumber";
        pub const SUBSCRIBER_ID: &str = "getSubscriberId";
        pub const SIM_OPERATOR: &str = "getSimOperator";
        pub const SIM_OPERATOR_NAME: &str = "getSimOperatorName";
        pub const SIM_COUNTRY_ISO: &str = "getSimCountryIso";
        pub const NETWORK_OPERATOR: &str = "getNetworkOperator";
        pub const NETWORK_OPERATOR_NAME: &str = "getNetworkOperatorName";
        pub const NETWORK_COUNTRY_ISO: &str = "getNetworkCountryIso";
        pub const NETWORK_TYPE: &str = "getNetworkType";
        pub const NETWORK_ROAMING: &str = "isNetworkRoaming";
    }
}

/// Reconciliation pass timing
pub mod timing {
    use super::Duration;

    /// Wait after a pass so platform callbacks triggered by probing can land
    pub const SETTLE_DELAY: Duration = Duration::from_millis(5000);
    pub const SETTLE_DELAY_MS: u64 = 5000;
    pub const MAX_SETTLE_DELAY_MS: u64 = 60_000;

    /// Periodic scan interval (15 minutes)
    pub const SCAN_INTERVAL_SECS: u64 = 15 * 60;
    pub const MIN_SCAN_INTERVAL_SECS: u64 = 60;
}

/// Size limits
pub mod limits {
    /// Maximum size of a persisted SIM store (1 MB)
    pub const MAX_STORE_SIZE: u64 = 1024 * 1024;

    /// Maximum size of a configuration or snapshot file (256 KB)
    pub const MAX_CONFIG_SIZE: u64 = 256 * 1024;

    /// Hex characters of an identifier digest written to logs
    pub const REDACTED_DIGEST_LEN: usize = 8;
}

/// Daemon scheduling and socket limits
pub mod daemon {
    use super::Duration;

    /// First retry delay after a retryable failure; doubles per consecutive failure
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(30);

    /// How long a session may run beyond the settle delay before it is abandoned
    pub const PASS_WAIT_MARGIN: Duration = Duration::from_secs(60);

    /// Socket permissions (owner only)
    pub const SOCKET_MODE: u32 = 0o600;

    /// Maximum concurrent client connections
    pub const MAX_CONNECTIONS: usize = 16;

    pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Requests allowed per client uid per window
    pub const RATE_LIMIT_REQUESTS: u32 = 120;
    pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

    /// Client-side wait for a daemon reply
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Notification names
pub mod events {
    /// Action name published when the canonical SIM list changes
    pub const SIM_LIST_CHANGED: &str = "sim-list-changed";
}
