//! Bounded recovery engine
//!
//! Recovery runs fire-and-forget relative to the probe loop: requests are
//! submitted to a semaphore-bounded worker pool, with an in-flight guard per
//! instance so the same instance is never recovered twice concurrently.
//! Attempts are capped; at the cap, auto-recovery is suppressed and the
//! instance is flagged for manual intervention until externally reset.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::Semaphore;

use vncfleet_core::config::RecoveryConfig;
use vncfleet_core::resilience::BreakerManager;
use vncfleet_discovery::Instance;

use crate::model::FailureType;
use crate::probe::{rfb_handshake, tcp_connect, ProbeConfig};

/// Result of an externally requested recovery run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub instance_id: String,
    pub failure_type: FailureType,
    pub succeeded: bool,
    pub attempts: u32,
}

/// Fleet-wide recovery executor with bounded concurrency
pub struct RecoveryEngine {
    breakers: Arc<BreakerManager>,
    cfg: RecoveryConfig,
    probe_cfg: ProbeConfig,
    attempts: DashMap<String, u32>,
    in_flight: DashSet<String>,
    manual: DashSet<String>,
    pool: Arc<Semaphore>,
}

impl RecoveryEngine {
    #[must_use]
    pub fn new(breakers: Arc<BreakerManager>, cfg: RecoveryConfig, probe_cfg: ProbeConfig) -> Self {
        let pool = Arc::new(Semaphore::new(cfg.worker_concurrency.max(1)));
        Self {
            breakers,
            cfg,
            probe_cfg,
            attempts: DashMap::new(),
            in_flight: DashSet::new(),
            manual: DashSet::new(),
            pool,
        }
    }

    #[must_use]
    pub fn attempts(&self, instance_id: &str) -> u32 {
        self.attempts.get(instance_id).map_or(0, |a| *a)
    }

    #[must_use]
    pub fn needs_manual_intervention(&self, instance_id: &str) -> bool {
        self.manual.contains(instance_id)
    }

    #[must_use]
    pub fn is_in_flight(&self, instance_id: &str) -> bool {
        self.in_flight.contains(instance_id)
    }

    /// Instances currently flagged for manual intervention.
    #[must_use]
    pub fn flagged_instances(&self) -> Vec<String> {
        let mut flagged: Vec<String> = self.manual.iter().map(|id| id.clone()).collect();
        flagged.sort();
        flagged
    }

    /// Externally reset an instance's attempt counter and manual flag.
    pub fn reset_attempts(&self, instance_id: &str) {
        self.attempts.remove(instance_id);
        self.manual.remove(instance_id);
        tracing::info!(instance_id = %instance_id, "Recovery attempts reset");
    }

    /// Submit an asynchronous recovery task. Returns whether the request was
    /// accepted; duplicates, exhausted and flagged instances are refused.
    pub fn request_recovery(self: &Arc<Self>, instance: Instance, failure: FailureType) -> bool {
        if failure == FailureType::None {
            return false;
        }
        let id = instance.id.clone();

        if self.manual.contains(&id) {
            return false;
        }
        if self.attempts(&id) >= self.cfg.max_attempts {
            if self.manual.insert(id.clone()) {
                tracing::warn!(
                    instance_id = %id,
                    max_attempts = self.cfg.max_attempts,
                    "Recovery attempts exhausted, flagging for manual intervention"
                );
            }
            return false;
        }
        if !self.in_flight.insert(id.clone()) {
            // Recovery already running for this instance.
            return false;
        }

        // Count the attempt at admission so the cap holds even while the
        // task is still running.
        *self.attempts.entry(id.clone()).or_insert(0) += 1;

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = match engine.pool.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    engine.in_flight.remove(&id);
                    return;
                }
            };

            let succeeded = engine.run_strategy(&instance, failure).await;
            tracing::info!(
                instance_id = %id,
                failure_type = ?failure,
                succeeded,
                attempt = engine.attempts(&id),
                "Recovery attempt finished"
            );
            engine.in_flight.remove(&id);
        });
        true
    }

    /// Run a recovery synchronously for an external request, resetting the
    /// attempt state first.
    pub async fn recover_now(&self, instance: &Instance, failure: FailureType) -> RecoveryReport {
        self.reset_attempts(&instance.id);
        *self.attempts.entry(instance.id.clone()).or_insert(0) += 1;
        let succeeded = self.run_strategy(instance, failure).await;
        RecoveryReport {
            instance_id: instance.id.clone(),
            failure_type: failure,
            succeeded,
            attempts: self.attempts(&instance.id),
        }
    }

    /// Strategy dispatch: stream-level reconnects for network failures,
    /// escalating reset for instance failures, both for mixed.
    async fn run_strategy(&self, instance: &Instance, failure: FailureType) -> bool {
        match failure {
            FailureType::None => true,
            FailureType::Network => self.retry_stream(instance).await,
            FailureType::Instance => self.escalating_reset(instance).await,
            FailureType::Mixed => {
                let reconnected = self.retry_stream(instance).await;
                let reset = self.escalating_reset(instance).await;
                reconnected && reset
            }
        }
    }

    /// Stream-level retry: bounded reconnect attempts against the protocol
    /// port, spaced by the configured delay.
    async fn retry_stream(&self, instance: &Instance) -> bool {
        let Some(addr) = instance.connect_addr(&self.probe_cfg.vnc_port_name) else {
            return false;
        };
        let breaker = self
            .breakers
            .breaker(&format!("recover:{}:stream", instance.id), None);
        let bound = self.probe_cfg.connect_timeout;

        for attempt in 0..self.cfg.network_retries.max(1) {
            let target = addr.clone();
            let result = breaker
                .fire(move || async move { tcp_connect(&target, bound).await })
                .await;
            if result.is_ok() {
                return true;
            }
            tracing::debug!(
                instance_id = %instance.id,
                attempt = attempt + 1,
                "Stream retry failed"
            );
            tokio::time::sleep(Duration::from_millis(self.cfg.retry_delay_ms)).await;
        }
        false
    }

    /// Escalating reset: first a soft handshake re-initialization, then a
    /// hard connect-drop cycle against the protocol port.
    async fn escalating_reset(&self, instance: &Instance) -> bool {
        let Some(addr) = instance.connect_addr(&self.probe_cfg.vnc_port_name) else {
            return false;
        };

        let soft_breaker = self
            .breakers
            .breaker(&format!("recover:{}:handshake", instance.id), None);
        let target = addr.clone();
        let bound = self.probe_cfg.handshake_timeout;
        let soft = soft_breaker
            .fire(move || async move { rfb_handshake(&target, bound).await })
            .await;
        if soft.is_ok() {
            return true;
        }

        let hard_breaker = self
            .breakers
            .breaker(&format!("recover:{}:reset", instance.id), None);
        let bound = self.probe_cfg.connect_timeout;
        hard_breaker
            .fire(move || async move { tcp_connect(&addr, bound).await })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vncfleet_core::resilience::BreakerOptions;
    use vncfleet_discovery::instance::{
        InstanceAddresses, InstanceHealth, InstanceMeta, InstanceStatus,
    };

    fn unreachable_instance(id: &str) -> Instance {
        let mut ports = BTreeMap::new();
        ports.insert("vnc".to_string(), 1); // closed port
        Instance {
            id: id.to_string(),
            display_name: None,
            addresses: InstanceAddresses {
                pod_ip: "127.0.0.1".to_string(),
                hostname: String::new(),
                dns_name: "127.0.0.1".to_string(),
            },
            ports,
            health: InstanceHealth { ready: true },
            status: InstanceStatus::Ready,
            provisioned: true,
            discovered_at: chrono::Utc::now(),
            meta: InstanceMeta::default(),
        }
    }

    fn engine() -> Arc<RecoveryEngine> {
        let breakers = Arc::new(BreakerManager::new(BreakerOptions {
            call_timeout: Duration::from_millis(500),
            // Keep breakers closed so every retry really hits the target.
            error_threshold_pct: 101.0,
            ..BreakerOptions::default()
        }));
        let cfg = RecoveryConfig {
            max_attempts: 3,
            worker_concurrency: 2,
            network_retries: 1,
            retry_delay_ms: 10,
        };
        let probe_cfg = ProbeConfig {
            connect_timeout: Duration::from_millis(200),
            handshake_timeout: Duration::from_millis(200),
            vnc_port_name: "vnc".to_string(),
            audio_port_name: "audio".to_string(),
            controls_port_name: "controls".to_string(),
        };
        Arc::new(RecoveryEngine::new(breakers, cfg, probe_cfg))
    }

    async fn wait_until_idle(engine: &RecoveryEngine, id: &str) {
        for _ in 0..100 {
            if !engine.is_in_flight(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("recovery for {id} never settled");
    }

    #[tokio::test]
    async fn test_attempts_are_capped_and_flagged() {
        let engine = engine();
        let instance = unreachable_instance("instance-2");

        for expected in 1..=3u32 {
            assert!(engine.request_recovery(instance.clone(), FailureType::Network));
            wait_until_idle(&engine, "instance-2").await;
            assert_eq!(engine.attempts("instance-2"), expected);
        }

        // Attempts have hit the cap: the 4th request is refused and the
        // instance flagged for manual intervention.
        assert!(!engine.request_recovery(instance.clone(), FailureType::Network));
        assert_eq!(engine.attempts("instance-2"), 3);
        assert!(engine.needs_manual_intervention("instance-2"));

        // And further requests stay refused without another strategy run.
        assert!(!engine.request_recovery(instance, FailureType::Network));
        assert_eq!(engine.attempts("instance-2"), 3);
    }

    #[tokio::test]
    async fn test_reset_reenables_auto_recovery() {
        let engine = engine();
        let instance = unreachable_instance("instance-4");

        for _ in 0..3 {
            engine.request_recovery(instance.clone(), FailureType::Network);
            wait_until_idle(&engine, "instance-4").await;
        }
        assert!(!engine.request_recovery(instance.clone(), FailureType::Network));
        assert!(engine.needs_manual_intervention("instance-4"));

        engine.reset_attempts("instance-4");
        assert_eq!(engine.attempts("instance-4"), 0);
        assert!(!engine.needs_manual_intervention("instance-4"));
        assert!(engine.request_recovery(instance, FailureType::Network));
        wait_until_idle(&engine, "instance-4").await;
    }

    #[tokio::test]
    async fn test_duplicate_concurrent_recovery_is_refused() {
        let engine = engine();
        let instance = unreachable_instance("instance-5");

        assert!(engine.request_recovery(instance.clone(), FailureType::Network));
        // While the first task is in flight, a duplicate is refused.
        assert!(!engine.request_recovery(instance.clone(), FailureType::Network));
        wait_until_idle(&engine, "instance-5").await;
        assert_eq!(engine.attempts("instance-5"), 1);
    }

    #[tokio::test]
    async fn test_healthy_failure_type_is_not_recovered() {
        let engine = engine();
        let instance = unreachable_instance("instance-6");
        assert!(!engine.request_recovery(instance, FailureType::None));
        assert_eq!(engine.attempts("instance-6"), 0);
    }
}
