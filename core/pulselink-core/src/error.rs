//! Error types for pulselink-core operations.
//!
//! Transport, staleness, and liveness failures are absorbed inside the
//! layer (the host always receives a well-formed record); only malformed
//! caller input and subprocess lifecycle failures surface as errors.

use std::path::PathBuf;

/// All errors that can escape pulselink-core operations.
#[derive(Debug, thiserror::Error)]
pub enum PulselinkError {
    #[error("Home directory not found; set PULSELINK_DIR to a writable path")]
    HomeDirNotFound,

    #[error("signal sample carries neither hrv nor heart_rate")]
    MissingSignal,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to launch producer {command}: {details}")]
    LaunchFailed { command: String, details: String },

    #[error("producer pid {pid} did not exit within {waited_ms}ms; check {log_hint}")]
    TerminateTimeout {
        pid: u32,
        waited_ms: u64,
        log_hint: PathBuf,
    },
}

impl PulselinkError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PulselinkError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PulselinkError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience alias for Results using PulselinkError.
pub type Result<T> = std::result::Result<T, PulselinkError>;
