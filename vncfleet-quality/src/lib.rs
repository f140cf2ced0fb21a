//! Fleet quality monitoring and bounded recovery
//!
//! Periodically probes every registered instance with independent sub-checks,
//! classifies health, and drives bounded remediation through the resilience
//! wrapper so one broken instance cannot degrade probing for the rest.

pub mod classify;
pub mod model;
pub mod monitor;
pub mod probe;
pub mod recovery;

pub use model::{AudioQuality, Availability, FailureType, ProbeState, QualityMetrics};
pub use monitor::{QualityMonitor, QualitySummary};
pub use probe::ProbeConfig;
pub use recovery::{RecoveryEngine, RecoveryReport};
