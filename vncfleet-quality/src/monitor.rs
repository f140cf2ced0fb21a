//! Fleet quality monitor
//!
//! Fans one probe task out per instance the registry currently serves,
//! classifies the results and replaces the cached metrics wholesale each
//! cycle. Degraded instances
//! are handed to the recovery engine fire-and-forget so a slow remediation
//! never delays the next probe cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use vncfleet_core::metrics::quality as quality_metrics;
use vncfleet_core::resilience::BreakerManager;
use vncfleet_discovery::{Instance, InstanceRegistry};

use crate::classify::{classify_audio_quality, classify_failure_type, classify_probe_state};
use crate::model::{AudioQuality, FailureType, ProbeState, QualityMetrics, QualitySignals};
use crate::probe::{probe_instance, ProbeConfig};
use crate::recovery::RecoveryEngine;

const PROBE_STATES: [ProbeState; 5] = [
    ProbeState::Unknown,
    ProbeState::Probing,
    ProbeState::Healthy,
    ProbeState::Degraded,
    ProbeState::Unavailable,
];

/// Fleet-level aggregation over the latest probe cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unavailable: usize,
    pub monitoring: bool,
    /// Instances currently failing, worst first.
    pub worst_offenders: Vec<WorstOffender>,
    pub manual_intervention: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorstOffender {
    pub instance_id: String,
    pub audio_quality: AudioQuality,
    pub failure_type: FailureType,
    pub recovery_attempts: u32,
}

/// Periodic prober over the registry's current instances
pub struct QualityMonitor {
    registry: Arc<InstanceRegistry>,
    breakers: Arc<BreakerManager>,
    recovery: Arc<RecoveryEngine>,
    probe_cfg: ProbeConfig,
    interval: Duration,
    metrics: DashMap<String, QualityMetrics>,
    states: DashMap<String, ProbeState>,
    loop_token: parking_lot::Mutex<Option<CancellationToken>>,
}

impl QualityMonitor {
    #[must_use]
    pub fn new(
        registry: Arc<InstanceRegistry>,
        breakers: Arc<BreakerManager>,
        recovery: Arc<RecoveryEngine>,
        probe_cfg: ProbeConfig,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            breakers,
            recovery,
            probe_cfg,
            interval,
            metrics: DashMap::new(),
            states: DashMap::new(),
            loop_token: parking_lot::Mutex::new(None),
        })
    }

    /// Start the periodic probe loop. Returns false when already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut guard = self.loop_token.lock();
        if guard.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *guard = Some(token.clone());
        drop(guard);

        let monitor = self.clone();
        tokio::spawn(async move {
            tracing::info!(interval = ?monitor.interval, "Quality monitor started");
            let mut ticker = tokio::time::interval(monitor.interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        tracing::info!("Quality monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        monitor.probe_all_instances().await;
                    }
                }
            }
        });
        true
    }

    /// Stop the probe loop. Returns false when it was not running.
    pub fn stop(&self) -> bool {
        match self.loop_token.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loop_token.lock().is_some()
    }

    /// Probe every instance the registry currently serves, not-ready ones
    /// included, then swap the cached metrics for the new cycle's results.
    pub async fn probe_all_instances(&self) -> Vec<QualityMetrics> {
        let instances = self.registry.get_instances().await;
        self.probe_instances(instances).await
    }

    /// Probe the given instances; split from `probe_all_instances` so the
    /// cycle can be exercised against a hand-built fleet.
    pub async fn probe_instances(&self, instances: Vec<Instance>) -> Vec<QualityMetrics> {
        let started = Instant::now();

        for instance in &instances {
            self.states.insert(instance.id.clone(), ProbeState::Probing);
        }

        let results = join_all(instances.iter().map(|i| self.probe_one(i))).await;

        // Replace wholesale so departed instances do not linger.
        self.metrics.clear();
        for metrics in &results {
            self.states.insert(
                metrics.instance_id.clone(),
                classify_probe_state(&metrics.availability, metrics.failure_type),
            );
            self.metrics.insert(metrics.instance_id.clone(), metrics.clone());
        }
        self.states.retain(|id, _| self.metrics.contains_key(id));

        for (metrics, instance) in results.iter().zip(&instances) {
            if metrics.recovery_needed {
                self.recovery
                    .request_recovery(instance.clone(), metrics.failure_type);
            }
        }

        self.export_health_distribution();
        quality_metrics::PROBE_CYCLE_DURATION.observe(started.elapsed().as_secs_f64());

        results
    }

    async fn probe_one(&self, instance: &Instance) -> QualityMetrics {
        let outcome = probe_instance(instance, &self.probe_cfg, &self.breakers).await;
        let audio_quality = classify_audio_quality(&outcome.availability, outcome.latency_ms);
        let failure_type = classify_failure_type(&outcome.availability, outcome.latency_ms);

        QualityMetrics {
            instance_id: instance.id.clone(),
            timestamp: Utc::now(),
            availability: outcome.availability,
            quality: synthesize_signals(&outcome.availability, outcome.latency_ms, audio_quality),
            errors: outcome.errors,
            failure_type,
            recovery_needed: failure_type != FailureType::None,
            recovery_attempts: self.recovery.attempts(&instance.id),
        }
    }

    /// Probe one instance on demand without touching the cached cycle.
    pub async fn deep_health(&self, instance: &Instance) -> QualityMetrics {
        self.probe_one(instance).await
    }

    /// Latest cycle's metrics, ordered by instance id.
    #[must_use]
    pub fn latest(&self) -> Vec<QualityMetrics> {
        let mut all: Vec<QualityMetrics> =
            self.metrics.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        all
    }

    #[must_use]
    pub fn latest_for(&self, instance_id: &str) -> Option<QualityMetrics> {
        self.metrics.get(instance_id).map(|e| e.value().clone())
    }

    #[must_use]
    pub fn state_for(&self, instance_id: &str) -> ProbeState {
        self.states
            .get(instance_id)
            .map_or(ProbeState::Unknown, |s| *s)
    }

    #[must_use]
    pub fn recovery(&self) -> Arc<RecoveryEngine> {
        self.recovery.clone()
    }

    /// Fleet counts by state plus the instances dragging them down.
    #[must_use]
    pub fn summary(&self) -> QualitySummary {
        let all = self.latest();
        let mut healthy = 0;
        let mut degraded = 0;
        let mut unavailable = 0;
        let mut worst = Vec::new();

        for metrics in &all {
            match classify_probe_state(&metrics.availability, metrics.failure_type) {
                ProbeState::Healthy => healthy += 1,
                ProbeState::Unavailable => unavailable += 1,
                _ => degraded += 1,
            }
            if metrics.failure_type != FailureType::None {
                worst.push(WorstOffender {
                    instance_id: metrics.instance_id.clone(),
                    audio_quality: metrics.quality.audio_quality,
                    failure_type: metrics.failure_type,
                    recovery_attempts: metrics.recovery_attempts,
                });
            }
        }
        // Unreachable before merely degraded.
        worst.sort_by_key(|w| match w.audio_quality {
            AudioQuality::Unavailable => 0,
            AudioQuality::Error => 1,
            AudioQuality::Poor => 2,
            AudioQuality::Fair => 3,
            AudioQuality::Good => 4,
            AudioQuality::Excellent => 5,
        });

        QualitySummary {
            total: all.len(),
            healthy,
            degraded,
            unavailable,
            monitoring: self.is_running(),
            worst_offenders: worst,
            manual_intervention: self.recovery.flagged_instances(),
        }
    }

    fn export_health_distribution(&self) {
        let mut counts = [0i64; PROBE_STATES.len()];
        for entry in self.states.iter() {
            let idx = PROBE_STATES
                .iter()
                .position(|s| s == entry.value())
                .unwrap_or(0);
            counts[idx] += 1;
        }
        for (state, count) in PROBE_STATES.iter().zip(counts) {
            quality_metrics::INSTANCE_HEALTH
                .with_label_values(&[state.as_str()])
                .set(count);
        }
    }
}

fn synthesize_signals(
    avail: &crate::model::Availability,
    latency_ms: Option<u64>,
    audio_quality: AudioQuality,
) -> QualitySignals {
    QualitySignals {
        connection_latency: latency_ms,
        video_frame_rate: if avail.stream { 30.0 } else { 0.0 },
        audio_quality,
        audio_level: if avail.audio { 0.8 } else { 0.0 },
        controls_responsive: avail.controls,
        // Loss and jitter are synthesized from the latency measurement until
        // the workers publish real transport stats.
        packet_loss: if avail.vnc { 0.0 } else { 1.0 },
        jitter: latency_ms.map_or(0.0, |l| l as f64 / 10.0),
    }
}
