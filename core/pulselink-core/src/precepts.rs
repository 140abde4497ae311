//! Precept derivation.
//!
//! Turns a validated record into discrete behavioral directives plus an
//! advisory note for the host application. Each evaluation starts from an
//! empty set, so re-evaluating the same record never accumulates
//! duplicates. Low-confidence records never trigger directives; that is a
//! deliberate false-positive guard.

use pulselink_protocol::{FlowState, StateRecord};

/// Minimum confidence required before any rule may fire.
pub const CONFIDENCE_FLOOR: f64 = 0.5;
/// Stress threshold for the concise-mode rule.
pub const CONCISE_STRESS_THRESHOLD: f64 = 0.7;

/// A discrete behavioral directive consumed by a downstream decision-maker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precept {
    ConciseMode,
    NoInterrupt,
}

impl Precept {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precept::ConciseMode => "CONCISE_MODE",
            Precept::NoInterrupt => "NO_INTERRUPT",
        }
    }
}

/// Directives plus the concatenated advisory note, in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct Advice {
    pub directives: Vec<Precept>,
    pub note: String,
}

impl Advice {
    pub fn directive_names(&self) -> Vec<String> {
        self.directives
            .iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }
}

/// Derives precepts from a validated record. Rules are evaluated in a
/// fixed order and may fire together; notes concatenate in that order.
pub fn derive_precepts(record: &StateRecord) -> Advice {
    let mut advice = Advice::default();

    if record.confidence <= CONFIDENCE_FLOOR {
        return advice;
    }

    if record.stress_index > CONCISE_STRESS_THRESHOLD {
        advice.directives.push(Precept::ConciseMode);
        push_note(
            &mut advice.note,
            &format!(
                "Biometric stress is elevated ({:.2}). Keep responses short and avoid non-essential follow-up questions.",
                record.stress_index
            ),
        );
    }

    if record.flow_state == FlowState::DeepFlow {
        advice.directives.push(Precept::NoInterrupt);
        push_note(
            &mut advice.note,
            "User is in deep flow. Provide complete, uninterrupted answers and do not break their focus.",
        );
    }

    advice
}

fn push_note(note: &mut String, addition: &str) {
    if !note.is_empty() {
        note.push(' ');
    }
    note.push_str(addition);
}
