//! Instance discovery primitive
//!
//! Turns the raw endpoint set into an ordered, cached snapshot of normalized
//! instances. API failures are contained here: discovery logs and returns an
//! empty list rather than erroring to the caller.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use vncfleet_core::metrics;
use vncfleet_core::resilience::BreakerManager;
use vncfleet_core::config::DiscoveryConfig;

use crate::endpoints::{Endpoints, EndpointsClient};
use crate::instance::Instance;

/// Breaker key for endpoint-set queries
const DISCOVERY_BREAKER: &str = "discovery:endpoints";

/// Ordered discovery result plus the raw source object it was derived from
#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    /// Instances ascending by ordinal, ids unique.
    pub instances: Vec<Instance>,
    pub last_update: DateTime<Utc>,
    pub raw: Option<Endpoints>,
}

impl DiscoverySnapshot {
    fn empty() -> Self {
        Self {
            instances: Vec::new(),
            last_update: Utc::now(),
            raw: None,
        }
    }
}

/// Queries the orchestration API and caches the latest snapshot
pub struct InstanceDiscovery {
    client: Arc<EndpointsClient>,
    cfg: DiscoveryConfig,
    breakers: Arc<BreakerManager>,
    snapshot: RwLock<Arc<DiscoverySnapshot>>,
}

impl InstanceDiscovery {
    #[must_use]
    pub fn new(
        client: Arc<EndpointsClient>,
        cfg: DiscoveryConfig,
        breakers: Arc<BreakerManager>,
    ) -> Self {
        Self {
            client,
            cfg,
            breakers,
            snapshot: RwLock::new(Arc::new(DiscoverySnapshot::empty())),
        }
    }

    /// Query the endpoint set, normalize and cache the result.
    ///
    /// Never fails: an unreachable or unauthorized API is logged and yields
    /// an empty instance list so the registry can decide on fallback.
    pub async fn discover_instances(&self) -> Vec<Instance> {
        let breaker = self.breakers.breaker(DISCOVERY_BREAKER, None);
        let client = self.client.clone();
        let result = breaker.fire(move || async move { client.get_endpoints().await }).await;

        match result {
            Ok(endpoints) => {
                let previous = self.snapshot.read().await.clone();
                let instances = normalize_endpoints(&endpoints, &self.cfg, &previous.instances);
                let snapshot = Arc::new(DiscoverySnapshot {
                    instances: instances.clone(),
                    last_update: Utc::now(),
                    raw: Some(endpoints),
                });
                *self.snapshot.write().await = snapshot;

                metrics::discovery::DISCOVERED_INSTANCES.set(instances.len() as i64);
                metrics::discovery::REFRESH_TOTAL
                    .with_label_values(&["ok"])
                    .inc();
                tracing::debug!(
                    service = %self.cfg.service,
                    instances = instances.len(),
                    "Discovery refreshed"
                );
                instances
            }
            Err(e) => {
                metrics::discovery::REFRESH_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                tracing::warn!(
                    service = %self.cfg.service,
                    error = %e,
                    "Discovery failed, returning empty instance list"
                );
                let snapshot = Arc::new(DiscoverySnapshot::empty());
                *self.snapshot.write().await = snapshot;
                Vec::new()
            }
        }
    }

    /// Latest cached snapshot.
    pub async fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        self.snapshot.read().await.clone()
    }

    #[must_use]
    pub fn client(&self) -> Arc<EndpointsClient> {
        self.client.clone()
    }
}

/// Normalize a raw endpoint set into instances sorted ascending by ordinal.
///
/// Ready addresses take precedence over not-ready ones when both map to the
/// same ordinal; duplicate ids are dropped so ids stay unique per snapshot.
/// Ids already present in `previous` keep their original `discovered_at`, so
/// an unchanged endpoint set normalizes to an identical instance list.
#[must_use]
pub fn normalize_endpoints(
    endpoints: &Endpoints,
    cfg: &DiscoveryConfig,
    previous: &[Instance],
) -> Vec<Instance> {
    let now = Utc::now();
    let mut instances: Vec<Instance> = Vec::new();

    for subset in &endpoints.subsets {
        for addr in &subset.addresses {
            instances.push(Instance::from_endpoint_address(
                addr,
                true,
                &subset.ports,
                &cfg.service,
                &cfg.namespace,
                &cfg.cluster_suffix,
                now,
            ));
        }
        for addr in &subset.not_ready_addresses {
            instances.push(Instance::from_endpoint_address(
                addr,
                false,
                &subset.ports,
                &cfg.service,
                &cfg.namespace,
                &cfg.cluster_suffix,
                now,
            ));
        }
    }

    // Ready entries first within each ordinal, then dedup keeps them.
    instances.sort_by(|a, b| {
        a.ordinal()
            .cmp(&b.ordinal())
            .then_with(|| b.health.ready.cmp(&a.health.ready))
    });
    instances.dedup_by(|a, b| a.id == b.id);

    // First-discovery timestamps survive later refreshes of the same id.
    for instance in &mut instances {
        if let Some(prior) = previous.iter().find(|p| p.id == instance.id) {
            instance.discovered_at = prior.discovered_at;
        }
    }
    instances
}
