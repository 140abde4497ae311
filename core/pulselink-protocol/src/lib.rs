//! Wire types for the Pulselink state channel.
//!
//! This crate is shared by the daemon and its clients to prevent schema
//! drift. Both transport paths (socket and state file) carry the same
//! [`StateRecord`] JSON, so a reader never needs to know which path
//! satisfied a request.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound for any single socket payload (request or response).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Advisory validity window producers stamp on fresh records, in seconds.
/// The validator enforces its own staleness ceiling independently of this.
pub const DEFAULT_TTL_SECONDS: u32 = 30;

/// Current time as epoch milliseconds, the timestamp unit of all records.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Discrete cognitive/affective state label.
///
/// Always derived from `stress_index` through the normalizer's threshold
/// table; no other component computes this mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Calm,
    Normal,
    Stressed,
    DeepFlow,
    Unknown,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Calm => "CALM",
            FlowState::Normal => "NORMAL",
            FlowState::Stressed => "STRESSED",
            FlowState::DeepFlow => "DEEP_FLOW",
            FlowState::Unknown => "UNKNOWN",
        }
    }
}

/// Canonical biometric snapshot exchanged between all components.
///
/// Records are created fresh on every signal update and supersede the
/// previous one in both channels; they are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Normalized stress level in [0, 1]; 0 = maximally calm.
    pub stress_index: f64,
    pub flow_state: FlowState,
    /// Producer clock, epoch milliseconds.
    pub timestamp: i64,
    /// Producer-declared validity window (advisory).
    pub ttl_seconds: u32,
    /// Producer process id; `<= 0` means no live producer (synthetic record).
    pub daemon_pid: i64,
    /// Signal reliability in [0, 1].
    pub confidence: f64,
    /// Provenance tag: "keystroke", "mobile_healthkit", "simulation", ...
    pub source: String,
}

impl StateRecord {
    /// The single fallback record used by every degradation path.
    ///
    /// "No signal" always means "behave exactly as if stress is absent",
    /// never an arbitrary or stale reading.
    pub fn default_unknown(timestamp: i64) -> Self {
        StateRecord {
            stress_index: 0.0,
            flow_state: FlowState::Unknown,
            timestamp,
            ttl_seconds: 0,
            daemon_pid: 0,
            confidence: 0.0,
            source: "default".to_string(),
        }
    }

    /// Clamps numeric fields into [0, 1]. Out-of-range inputs are never
    /// propagated raw.
    pub fn sanitized(mut self) -> Self {
        self.stress_index = self.stress_index.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// Whether a live producer claims authority over this record.
    pub fn has_producer(&self) -> bool {
        self.daemon_pid > 0
    }
}

/// One raw signal sample from a sensing collaborator.
///
/// Mirrors the ingestion body `{hrv?, heart_rate?, source?, timestamp?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalSample {
    /// Heart-rate variability (RMSSD) in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<f64>,
    /// Heart rate in beats per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Epoch milliseconds; defaults to receipt time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SignalSample {
    /// A sample carrying neither signal is a caller bug, not absence of
    /// signal, and is rejected rather than defaulted.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.hrv.is_none() && self.heart_rate.is_none() {
            return Err(ErrorInfo::new(
                "missing_signal",
                "sample must carry hrv or heart_rate",
            ));
        }
        Ok(())
    }
}

/// Optional request line a client may send after the daemon delivers the
/// current record on connect.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PushRequest {
    /// Replace the current record (last write wins).
    Publish { record: StateRecord },
    /// Normalize a raw signal sample and adopt the result.
    Ingest { sample: SignalSample },
    /// Read-only daemon status.
    Status,
}

/// Reply to a [`PushRequest`], one JSON line.
#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl PushResponse {
    pub fn ok(data: Value) -> Self {
        PushResponse {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        PushResponse {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        ErrorInfo {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Summary returned to ingestion callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub stress_index: f64,
    pub flow_state: FlowState,
    pub source: String,
}

impl From<&StateRecord> for StateSummary {
    fn from(record: &StateRecord) -> Self {
        StateSummary {
            stress_index: record.stress_index,
            flow_state: record.flow_state,
            source: record.source.clone(),
        }
    }
}

/// Payload of the read-only `status` request.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusPayload {
    pub daemon_running: bool,
    pub state: StateRecord,
}
