//! Staleness and producer-liveness validation.
//!
//! Every record obtained from the transport channel passes through here
//! before it is trusted. A record that fails any check is discarded and
//! replaced with the default record; a dead producer's last value must
//! never be mistaken for live signal.

use std::time::Duration;

use pulselink_protocol::{now_ms, StateRecord};
use tracing::debug;

use crate::process::ProcessProbe;

/// Validation policy.
///
/// The staleness ceiling is a long trust window, enforced regardless of
/// the record's advisory `ttl_seconds`. It is a different constant from
/// the short per-request transport timeout and the two must not be
/// conflated.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub staleness_ceiling: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            staleness_ceiling: Duration::from_secs(60),
        }
    }
}

/// Why a record was or was not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Record is current and its producer is alive.
    Fresh,
    /// Record age exceeded the staleness ceiling.
    Stale,
    /// Record claimed a producer that is no longer running.
    DeadProducer,
    /// Record never had a live producer (`daemon_pid <= 0`).
    NoProducer,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fresh => "fresh",
            Verdict::Stale => "stale",
            Verdict::DeadProducer => "dead_producer",
            Verdict::NoProducer => "no_producer",
        }
    }
}

/// A validated record. For any verdict other than [`Verdict::Fresh`] the
/// record is the default record, timestamped at validation time.
#[derive(Debug, Clone)]
pub struct Validated {
    pub record: StateRecord,
    pub verdict: Verdict,
}

/// Applies the staleness and liveness rules to a fetched record.
pub fn validate(
    record: StateRecord,
    config: &ValidatorConfig,
    probe: &dyn ProcessProbe,
) -> Validated {
    validate_at(record, now_ms(), config, probe)
}

/// Like [`validate`], with an explicit clock for tests.
pub fn validate_at(
    record: StateRecord,
    now: i64,
    config: &ValidatorConfig,
    probe: &dyn ProcessProbe,
) -> Validated {
    let age_ms = now.saturating_sub(record.timestamp);
    if age_ms > config.staleness_ceiling.as_millis() as i64 {
        debug!(age_ms, "Record exceeded staleness ceiling, discarding");
        return Validated {
            record: StateRecord::default_unknown(now),
            verdict: Verdict::Stale,
        };
    }

    // Zero, negative, or out-of-range pids cannot name a live producer;
    // a truncating cast could probe an unrelated process instead.
    let pid = match u32::try_from(record.daemon_pid) {
        Ok(pid) if pid > 0 => pid,
        _ => {
            return Validated {
                record: StateRecord::default_unknown(now),
                verdict: Verdict::NoProducer,
            };
        }
    };

    if !probe.is_alive(pid) {
        debug!(pid = record.daemon_pid, "Producer not running, discarding record");
        return Validated {
            record: StateRecord::default_unknown(now),
            verdict: Verdict::DeadProducer,
        };
    }

    Validated {
        record: record.sanitized(),
        verdict: Verdict::Fresh,
    }
}
