//! Host-facing engine.
//!
//! One entry point per inbound host event: fetch the current record over
//! the transport channel, validate it, derive precepts, and hand the host
//! a well-formed context. The host never observes a missing-signal
//! condition as an error.

use std::process::Command;

use pulselink_protocol::{SignalSample, StateRecord, StateSummary};

use crate::config::BridgePaths;
use crate::error::Result;
use crate::lifecycle::{LifecycleController, StartOutcome, StopOutcome};
use crate::normalize::{normalize_sample, record_from_stress};
use crate::precepts::{derive_precepts, Advice};
use crate::process::{ProcessProbe, SignalProbe};
use crate::transport::{fetch, publish, Channel};
use crate::validate::{validate, Validated, ValidatorConfig, Verdict};

/// Everything the host merges into its own request context for one event.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub record: StateRecord,
    pub directives: Vec<String>,
    pub note: String,
    pub verdict: Verdict,
    pub channel: Channel,
}

/// Operator-facing status, distinguishing the three remediation cases:
/// producer down, producer up with untrusted signal, producer up and fresh.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub producer_running: bool,
    pub producer_pid: Option<u32>,
    pub verdict: Verdict,
    pub channel: Channel,
    pub record: StateRecord,
}

impl StatusReport {
    pub fn describe(&self) -> &'static str {
        if !self.producer_running {
            "producer not running"
        } else if self.verdict == Verdict::Fresh {
            "producer running, signal fresh"
        } else {
            "producer running, signal stale or dead"
        }
    }
}

/// The state distribution layer, bundled behind one handle.
pub struct BridgeEngine {
    paths: BridgePaths,
    config: ValidatorConfig,
    probe: Box<dyn ProcessProbe>,
}

impl BridgeEngine {
    pub fn new(paths: BridgePaths) -> Self {
        BridgeEngine {
            paths,
            config: ValidatorConfig::default(),
            probe: Box::new(SignalProbe),
        }
    }

    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn ProcessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn paths(&self) -> &BridgePaths {
        &self.paths
    }

    /// Current validated state plus derived directives, for one host event.
    pub fn context(&self) -> HostContext {
        let fetched = fetch(&self.paths);
        let Validated { record, verdict } =
            validate(fetched.record, &self.config, self.probe.as_ref());
        let Advice { directives, note } = derive_precepts(&record);

        HostContext {
            directives: directives.iter().map(|p| p.as_str().to_string()).collect(),
            note,
            record,
            verdict,
            channel: fetched.channel,
        }
    }

    /// Operator status: process liveness by signal probe combined with a
    /// validated read for display.
    pub fn status(&self) -> StatusReport {
        let controller = LifecycleController::new(&self.paths, self.probe.as_ref());
        let producer_running = controller.is_running();
        let producer_pid = controller.tracked().map(|marker| marker.pid);

        let fetched = fetch(&self.paths);
        let Validated { record, verdict } =
            validate(fetched.record, &self.config, self.probe.as_ref());

        StatusReport {
            producer_running,
            producer_pid,
            verdict,
            channel: fetched.channel,
            record,
        }
    }

    /// Normalizes one raw signal sample and publishes the result on both
    /// channels. Rejection of an empty sample propagates to the caller.
    pub fn ingest_sample(&self, sample: &SignalSample) -> Result<StateSummary> {
        let record = normalize_sample(sample, self.authoritative_pid())?;
        publish(&self.paths, &record)?;
        Ok(StateSummary::from(&record))
    }

    /// Injects a synthetic record (testing surface). The record stays
    /// authoritative only while the stamped process lives.
    pub fn inject(&self, stress: f64, confidence: f64, source: &str) -> Result<StateRecord> {
        let record = record_from_stress(
            stress,
            confidence,
            source,
            self.authoritative_pid(),
            pulselink_protocol::now_ms(),
        );
        publish(&self.paths, &record)?;
        Ok(record)
    }

    /// Launches the producer daemon via the lifecycle controller.
    pub fn start_producer(&self, command: &mut Command) -> Result<StartOutcome> {
        LifecycleController::new(&self.paths, self.probe.as_ref()).start(command)
    }

    /// Stops the producer daemon via the lifecycle controller.
    pub fn stop_producer(&self) -> Result<StopOutcome> {
        LifecycleController::new(&self.paths, self.probe.as_ref()).stop()
    }

    /// Pid to stamp on locally-produced records: the live tracked producer
    /// when there is one, otherwise this process.
    fn authoritative_pid(&self) -> i64 {
        let controller = LifecycleController::new(&self.paths, self.probe.as_ref());
        if controller.is_running() {
            if let Some(marker) = controller.tracked() {
                return marker.pid as i64;
            }
        }
        std::process::id() as i64
    }
}
