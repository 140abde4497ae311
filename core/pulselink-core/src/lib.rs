//! # pulselink-core
//!
//! State distribution and validation layer for Pulselink: moves a
//! continuously-updated biometric state record from a producer daemon to
//! consumer processes with sub-millisecond latency when the socket channel
//! is up and graceful degradation when it is not.
//!
//! ## Design principles
//!
//! - **Synchronous**: no async runtime; every socket operation carries an
//!   explicit short timeout and resolves to fallback rather than hanging.
//! - **Explicit handles**: well-known locations travel in a [`BridgePaths`]
//!   bundle passed into each component; tests point it at a tempdir.
//! - **Graceful degradation**: a consumer always receives a well-formed
//!   record; "no signal" is the inert default record, never an error and
//!   never a stale reading.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use pulselink_core::{BridgeEngine, BridgePaths};
//!
//! let engine = BridgeEngine::new(BridgePaths::resolve()?);
//! let context = engine.context();
//! for directive in &context.directives {
//!     // merge into the host request context
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod normalize;
pub mod precepts;
pub mod process;
pub mod transport;
pub mod validate;

pub use config::BridgePaths;
pub use engine::{BridgeEngine, HostContext, StatusReport};
pub use error::{PulselinkError, Result};
pub use lifecycle::{LifecycleController, PidMarker, StartOutcome, StopOutcome};
pub use normalize::{
    flow_state_from_stress, normalize_sample, record_from_stress, stress_from_heart_rate,
    stress_from_hrv,
};
pub use precepts::{derive_precepts, Advice, Precept};
pub use process::{ProcessProbe, SignalProbe};
pub use transport::{fetch, publish, Channel, Fetched};
pub use validate::{validate, Validated, ValidatorConfig, Verdict};
