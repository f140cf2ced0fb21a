//! Pure quality classification
//!
//! `failure_type` and `audio_quality` are functions of the availability
//! booleans and measured signals only, so the same inputs always classify
//! identically regardless of probe timing.

use crate::model::{AudioQuality, Availability, FailureType, ProbeState};

/// Latency bands in milliseconds
pub const LATENCY_EXCELLENT_MS: u64 = 50;
pub const LATENCY_GOOD_MS: u64 = 100;
pub const LATENCY_FAIR_MS: u64 = 200;

/// Combine connection latency bands with the availability booleans.
///
/// Connectivity failure forces `unavailable`; audio and controls both failing
/// forces `error`; a single missing sub-check caps the band at `fair`.
#[must_use]
pub fn classify_audio_quality(avail: &Availability, latency_ms: Option<u64>) -> AudioQuality {
    if !avail.vnc {
        return AudioQuality::Unavailable;
    }
    let Some(latency) = latency_ms else {
        return AudioQuality::Unavailable;
    };
    if !avail.audio && !avail.controls {
        return AudioQuality::Error;
    }

    let band = if latency < LATENCY_EXCELLENT_MS {
        AudioQuality::Excellent
    } else if latency < LATENCY_GOOD_MS {
        AudioQuality::Good
    } else if latency < LATENCY_FAIR_MS {
        AudioQuality::Fair
    } else {
        AudioQuality::Poor
    };

    if !avail.audio || !avail.controls {
        return match band {
            AudioQuality::Excellent | AudioQuality::Good => AudioQuality::Fair,
            other => other,
        };
    }
    band
}

/// Classify the failure shape for recovery-strategy selection.
///
/// `network`: connectivity failed or latency degraded past the fair band.
/// `instance`: reachable but internal sub-checks failing.
/// `mixed`: both at once.
#[must_use]
pub fn classify_failure_type(avail: &Availability, latency_ms: Option<u64>) -> FailureType {
    let network_issue = !avail.vnc || latency_ms.is_none_or(|l| l >= LATENCY_FAIR_MS);
    let instance_issue = avail.vnc && (!avail.stream || (!avail.audio && !avail.controls));

    match (network_issue, instance_issue) {
        (true, true) => FailureType::Mixed,
        (true, false) => FailureType::Network,
        (false, true) => FailureType::Instance,
        (false, false) => FailureType::None,
    }
}

/// Terminal probe state for one cycle.
#[must_use]
pub fn classify_probe_state(avail: &Availability, failure: FailureType) -> ProbeState {
    if !avail.vnc {
        ProbeState::Unavailable
    } else if failure == FailureType::None {
        ProbeState::Healthy
    } else {
        ProbeState::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avail(vnc: bool, stream: bool, audio: bool, controls: bool) -> Availability {
        Availability {
            vnc,
            stream,
            audio,
            controls,
        }
    }

    #[test]
    fn test_fast_and_fully_available_is_excellent() {
        let quality = classify_audio_quality(&avail(true, true, true, true), Some(30));
        assert_eq!(quality, AudioQuality::Excellent);
    }

    #[test]
    fn test_latency_bands() {
        let a = avail(true, true, true, true);
        assert_eq!(classify_audio_quality(&a, Some(49)), AudioQuality::Excellent);
        assert_eq!(classify_audio_quality(&a, Some(50)), AudioQuality::Good);
        assert_eq!(classify_audio_quality(&a, Some(99)), AudioQuality::Good);
        assert_eq!(classify_audio_quality(&a, Some(150)), AudioQuality::Fair);
        assert_eq!(classify_audio_quality(&a, Some(400)), AudioQuality::Poor);
    }

    #[test]
    fn test_no_connectivity_is_unavailable() {
        let quality = classify_audio_quality(&avail(false, false, false, false), Some(999));
        assert_eq!(quality, AudioQuality::Unavailable);

        let quality = classify_audio_quality(&avail(true, true, true, true), None);
        assert_eq!(quality, AudioQuality::Unavailable);
    }

    #[test]
    fn test_audio_and_controls_both_failing_is_error() {
        let quality = classify_audio_quality(&avail(true, true, false, false), Some(500));
        assert_eq!(quality, AudioQuality::Error);
    }

    #[test]
    fn test_single_missing_subcheck_caps_at_fair() {
        let quality = classify_audio_quality(&avail(true, true, false, true), Some(20));
        assert_eq!(quality, AudioQuality::Fair);
    }

    #[test]
    fn test_failure_type_none_when_healthy() {
        let failure = classify_failure_type(&avail(true, true, true, true), Some(30));
        assert_eq!(failure, FailureType::None);
    }

    #[test]
    fn test_failure_type_network_when_unreachable() {
        let failure = classify_failure_type(&avail(false, false, false, false), None);
        assert_eq!(failure, FailureType::Network);
    }

    #[test]
    fn test_failure_type_instance_when_reachable_but_broken() {
        let failure = classify_failure_type(&avail(true, false, true, true), Some(30));
        assert_eq!(failure, FailureType::Instance);
    }

    #[test]
    fn test_failure_type_mixed_on_slow_and_broken() {
        // 500ms latency plus failed audio and controls: both the network and
        // the instance are implicated.
        let failure = classify_failure_type(&avail(true, true, false, false), Some(500));
        assert_eq!(failure, FailureType::Mixed);
    }

    #[test]
    fn test_probe_state() {
        assert_eq!(
            classify_probe_state(&avail(false, false, false, false), FailureType::Network),
            ProbeState::Unavailable
        );
        assert_eq!(
            classify_probe_state(&avail(true, true, true, true), FailureType::None),
            ProbeState::Healthy
        );
        assert_eq!(
            classify_probe_state(&avail(true, false, true, true), FailureType::Instance),
            ProbeState::Degraded
        );
    }
}
