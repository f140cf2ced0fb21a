//! Quality data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Perceived audio/session quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Error,
    Unavailable,
}

/// Failure classification driving the recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    None,
    Network,
    Instance,
    Mixed,
}

/// Per-instance probe state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Unknown,
    Probing,
    Healthy,
    Degraded,
    Unavailable,
}

impl ProbeState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Probing => "probing",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Independent availability booleans from the four probe sub-checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Raw protocol-port connectivity.
    pub vnc: bool,
    /// Protocol handshake (version banner) succeeded.
    pub stream: bool,
    pub audio: bool,
    pub controls: bool,
}

/// Measured and synthesized quality signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySignals {
    /// Connect latency in milliseconds; absent when unreachable.
    pub connection_latency: Option<u64>,
    pub video_frame_rate: f64,
    pub audio_quality: AudioQuality,
    /// Normalized audio level in `[0, 1]`.
    pub audio_level: f64,
    pub controls_responsive: bool,
    pub packet_loss: f64,
    pub jitter: f64,
}

/// Full probe result for one instance, replaced wholesale each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub availability: Availability,
    pub quality: QualitySignals,
    pub errors: Vec<String>,
    pub failure_type: FailureType,
    pub recovery_needed: bool,
    pub recovery_attempts: u32,
}
