use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (64KB, a full SIM list fits comfortably)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// HNI is MCC (3 digits) followed by MNC (2 or 3 digits)
const MIN_HNI_LENGTH: usize = 5;
const MAX_HNI_LENGTH: usize = 6;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Run a pass now. With `wait` the reply carries its outcome.
    Trigger { wait: bool },
    /// SIMs currently in a slot
    ListSims,
    /// Stored SIMs in a slot that belong to the given network
    PresentByHni { hni: String },
    Status,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::Trigger { .. }
            | Request::ListSims
            | Request::Status => Ok(()),
            Request::PresentByHni { hni } => validate_hni(hni),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Trigger { .. } => "Trigger",
            Request::ListSims => "ListSims",
            Request::PresentByHni { .. } => "PresentByHni",
            Request::Status => "Status",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sims: Option<Vec<SimSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_status: Option<StatusInfo>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn sim_list(s: Vec<SimSummary>) -> Self { Self { sims: Some(s), ..Self::default() } }
    pub fn pass_report(p: PassReport) -> Self { Self { pass: Some(p), ..Self::default() } }
    pub fn status(s: StatusInfo) -> Self { Self { daemon_status: Some(s), ..Self::default() } }
}

/// One SIM as shown to clients. The serial is only ever sent as a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSummary {
    pub slot_index: i32,
    pub subscription_id: i32,
    pub serial_digest: String,
    pub operator_name: Option<String>,
    pub country_iso: Option<String>,
    pub hni: Option<String>,
    pub roaming: bool,
    /// `"<operator> <COUNTRY> (SIM n)"`
    pub display: String,
}

/// Result of a pass run on request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassReport {
    /// Queued; the caller did not wait
    Queued,
    Unchanged,
    Changed,
    /// Failed; `retryable` tells whether the scheduler will try again soon
    Failed { retryable: bool },
    /// Listeners could not be registered
    Retry,
    /// No result within the daemon's wait limit
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub version: String,
    /// Coordinator state, e.g. `idle`, `probing`, `settling`
    pub state: String,
    pub passes: u64,
    pub changes: u64,
    pub failures: u64,
    pub last_report: Option<PassReport>,
    pub scan_interval_secs: u64,
    pub slot_count: u32,
    pub snapshot_path: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_sims(sims: Vec<SimSummary>) -> Self {
        Response::Ok(ResponseData::sim_list(sims))
    }

    pub fn ok_pass(report: PassReport) -> Self {
        Response::Ok(ResponseData::pass_report(report))
    }

    pub fn ok_status(status: StatusInfo) -> Self {
        Response::Ok(ResponseData::status(status))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_hni(hni: &str) -> Result<(), String> {
    if hni.is_empty() {
        return Err("HNI cannot be empty".into());
    }
    if !hni.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("HNI must be digits only: {:?}", hni));
    }
    if !(MIN_HNI_LENGTH..=MAX_HNI_LENGTH).contains(&hni.len()) {
        return Err(format!(
            "HNI must be {}-{} digits, got {}",
            MIN_HNI_LENGTH,
            MAX_HNI_LENGTH,
            hni.len()
        ));
    }
    Ok(())
}
