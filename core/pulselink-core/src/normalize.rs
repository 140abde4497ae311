//! Sensor-fusion normalization.
//!
//! Converts heterogeneous raw signals (HRV, heart rate) into one canonical
//! [`StateRecord`] with consistent semantics regardless of sensor type.
//! The flow-state threshold table here is the single authoritative mapping
//! from stress to flow state.

use pulselink_protocol::{now_ms, FlowState, SignalSample, StateRecord, DEFAULT_TTL_SECONDS};

use crate::error::{PulselinkError, Result};

/// Confidence stamped on HRV-derived records. RMSSD is a direct autonomic
/// measure and the most reliable signal we ingest.
pub const HRV_CONFIDENCE: f64 = 0.9;
/// Confidence stamped on heart-rate-derived records. Raw BPM is a much
/// weaker stress proxy than HRV.
pub const HEART_RATE_CONFIDENCE: f64 = 0.6;

const DEFAULT_REMOTE_SOURCE: &str = "mobile_healthkit";

/// Maps HRV (RMSSD, milliseconds) to a stress index.
///
/// Non-increasing: higher HRV implies lower stress.
pub fn stress_from_hrv(rmssd_ms: f64) -> f64 {
    if rmssd_ms >= 100.0 {
        0.1
    } else if rmssd_ms >= 80.0 {
        0.2
    } else if rmssd_ms >= 60.0 {
        0.4
    } else if rmssd_ms >= 40.0 {
        0.6
    } else if rmssd_ms >= 25.0 {
        0.8
    } else {
        0.95
    }
}

/// Maps heart rate (BPM, resting context) to a stress index.
///
/// Non-decreasing, and lower-confidence than HRV: elevated BPM has many
/// non-stress causes.
pub fn stress_from_heart_rate(bpm: f64) -> f64 {
    if bpm < 60.0 {
        0.2
    } else if bpm < 70.0 {
        0.3
    } else if bpm < 80.0 {
        0.5
    } else if bpm < 90.0 {
        0.6
    } else if bpm < 100.0 {
        0.75
    } else {
        0.9
    }
}

/// The authoritative stress → flow-state threshold table.
pub fn flow_state_from_stress(stress: f64) -> FlowState {
    if stress < 0.25 {
        FlowState::DeepFlow
    } else if stress < 0.40 {
        FlowState::Calm
    } else if stress < 0.65 {
        FlowState::Normal
    } else {
        FlowState::Stressed
    }
}

/// Builds a record from a stress index, deriving the flow state so the two
/// can never be set inconsistently by a producer-facing API.
pub fn record_from_stress(
    stress: f64,
    confidence: f64,
    source: &str,
    producer_pid: i64,
    timestamp: i64,
) -> StateRecord {
    let record = StateRecord {
        stress_index: stress,
        flow_state: FlowState::Unknown,
        timestamp,
        ttl_seconds: DEFAULT_TTL_SECONDS,
        daemon_pid: producer_pid,
        confidence,
        source: source.to_string(),
    }
    .sanitized();
    StateRecord {
        flow_state: flow_state_from_stress(record.stress_index),
        ..record
    }
}

/// Normalizes one raw sample into a canonical record.
///
/// When both signals are present HRV takes precedence. A sample lacking
/// both is rejected as a caller error.
pub fn normalize_sample(sample: &SignalSample, producer_pid: i64) -> Result<StateRecord> {
    let (stress, confidence) = match (sample.hrv, sample.heart_rate) {
        (Some(hrv), _) => (stress_from_hrv(hrv), HRV_CONFIDENCE),
        (None, Some(bpm)) => (stress_from_heart_rate(bpm), HEART_RATE_CONFIDENCE),
        (None, None) => return Err(PulselinkError::MissingSignal),
    };

    let source = sample.source.as_deref().unwrap_or(DEFAULT_REMOTE_SOURCE);
    let timestamp = sample.timestamp.unwrap_or_else(now_ms);
    Ok(record_from_stress(
        stress,
        confidence,
        source,
        producer_pid,
        timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrv_bands_match_reference_table() {
        assert_eq!(stress_from_hrv(120.0), 0.1);
        assert_eq!(stress_from_hrv(100.0), 0.1);
        assert_eq!(stress_from_hrv(85.0), 0.2);
        assert_eq!(stress_from_hrv(60.0), 0.4);
        assert_eq!(stress_from_hrv(41.0), 0.6);
        assert_eq!(stress_from_hrv(25.0), 0.8);
        assert_eq!(stress_from_hrv(10.0), 0.95);
    }

    #[test]
    fn heart_rate_bands_match_reference_table() {
        assert_eq!(stress_from_heart_rate(55.0), 0.2);
        assert_eq!(stress_from_heart_rate(65.0), 0.3);
        assert_eq!(stress_from_heart_rate(75.0), 0.5);
        assert_eq!(stress_from_heart_rate(85.0), 0.6);
        assert_eq!(stress_from_heart_rate(95.0), 0.75);
        assert_eq!(stress_from_heart_rate(130.0), 0.9);
    }

    #[test]
    fn stress_from_hrv_is_non_increasing() {
        let mut previous = f64::INFINITY;
        for step in 0..400 {
            let stress = stress_from_hrv(step as f64 * 0.5);
            assert!(stress <= previous, "increase at rmssd {}", step as f64 * 0.5);
            previous = stress;
        }
    }

    #[test]
    fn stress_from_heart_rate_is_non_decreasing() {
        let mut previous = f64::NEG_INFINITY;
        for step in 0..400 {
            let stress = stress_from_heart_rate(step as f64 * 0.5);
            assert!(stress >= previous, "decrease at bpm {}", step as f64 * 0.5);
            previous = stress;
        }
    }

    #[test]
    fn flow_state_thresholds() {
        assert_eq!(flow_state_from_stress(0.0), FlowState::DeepFlow);
        assert_eq!(flow_state_from_stress(0.24), FlowState::DeepFlow);
        assert_eq!(flow_state_from_stress(0.25), FlowState::Calm);
        assert_eq!(flow_state_from_stress(0.39), FlowState::Calm);
        assert_eq!(flow_state_from_stress(0.40), FlowState::Normal);
        assert_eq!(flow_state_from_stress(0.64), FlowState::Normal);
        assert_eq!(flow_state_from_stress(0.65), FlowState::Stressed);
        assert_eq!(flow_state_from_stress(1.0), FlowState::Stressed);
    }

    #[test]
    fn hrv_90_yields_deep_flow() {
        let sample = SignalSample {
            hrv: Some(90.0),
            ..SignalSample::default()
        };
        let record = normalize_sample(&sample, 100).unwrap();
        assert_eq!(record.stress_index, 0.2);
        assert_eq!(record.flow_state, FlowState::DeepFlow);
        assert_eq!(record.confidence, HRV_CONFIDENCE);
    }

    #[test]
    fn heart_rate_95_yields_stressed_with_low_confidence() {
        let sample = SignalSample {
            heart_rate: Some(95.0),
            ..SignalSample::default()
        };
        let record = normalize_sample(&sample, 100).unwrap();
        assert_eq!(record.stress_index, 0.75);
        assert_eq!(record.confidence, HEART_RATE_CONFIDENCE);
        assert_eq!(record.flow_state, FlowState::Stressed);
    }

    #[test]
    fn hrv_takes_precedence_over_heart_rate() {
        let sample = SignalSample {
            hrv: Some(110.0),
            heart_rate: Some(140.0),
            ..SignalSample::default()
        };
        let record = normalize_sample(&sample, 100).unwrap();
        assert_eq!(record.stress_index, 0.1);
        assert_eq!(record.confidence, HRV_CONFIDENCE);
    }

    #[test]
    fn empty_sample_is_rejected() {
        let err = normalize_sample(&SignalSample::default(), 100).unwrap_err();
        assert!(matches!(err, PulselinkError::MissingSignal));
    }

    #[test]
    fn sample_source_and_timestamp_are_preserved() {
        let sample = SignalSample {
            hrv: Some(50.0),
            source: Some("simulation".to_string()),
            timestamp: Some(1_700_000_000_000),
            ..SignalSample::default()
        };
        let record = normalize_sample(&sample, 7).unwrap();
        assert_eq!(record.source, "simulation");
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.daemon_pid, 7);
    }

    #[test]
    fn record_from_stress_clamps_before_deriving_flow() {
        let record = record_from_stress(4.2, 1.5, "simulation", 1, 0);
        assert_eq!(record.stress_index, 1.0);
        assert_eq!(record.confidence, 1.0);
        assert_eq!(record.flow_state, FlowState::Stressed);

        let record = record_from_stress(-0.5, 0.5, "simulation", 1, 0);
        assert_eq!(record.stress_index, 0.0);
        assert_eq!(record.flow_state, FlowState::DeepFlow);
    }
}
