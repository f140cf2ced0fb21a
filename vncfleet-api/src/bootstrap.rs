//! Component wiring
//!
//! Builds the discovery, quality and resilience components from one loaded
//! configuration. Separated from `main.rs` so integration tests can stand up
//! the same stack against a mock API server.

use std::sync::Arc;
use std::time::Duration;

use vncfleet_core::resilience::{BreakerManager, BreakerOptions};
use vncfleet_core::{Config, Result};
use vncfleet_discovery::{EndpointsClient, InstanceDiscovery, InstanceRegistry};
use vncfleet_quality::{ProbeConfig, QualityMonitor, RecoveryEngine};

use crate::http::AppState;

/// Build the full application state from configuration.
///
/// A missing or unreadable fallback document is fatal only when one was
/// explicitly configured.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let breakers = Arc::new(BreakerManager::new(BreakerOptions::from(&config.resilience)));

    let client = Arc::new(EndpointsClient::from_config(&config.discovery)?);
    let discovery = Arc::new(InstanceDiscovery::new(
        client,
        config.discovery.clone(),
        breakers.clone(),
    ));

    let fallback = if config.fallback.path.is_empty() {
        Vec::new()
    } else {
        let instances = InstanceRegistry::load_fallback(
            std::path::Path::new(&config.fallback.path),
            &config.quality.vnc_port_name,
        )
        .await?;
        tracing::info!(
            path = %config.fallback.path,
            instances = instances.len(),
            "Loaded static fallback instances"
        );
        instances
    };
    let registry = Arc::new(InstanceRegistry::new(
        discovery,
        fallback,
        config.fallback.strict,
    ));

    let probe_cfg = ProbeConfig::from(&config.quality);
    let recovery = Arc::new(RecoveryEngine::new(
        breakers.clone(),
        config.recovery.clone(),
        probe_cfg.clone(),
    ));
    let monitor = QualityMonitor::new(
        registry.clone(),
        breakers.clone(),
        recovery.clone(),
        probe_cfg,
        Duration::from_secs(config.quality.probe_interval_secs),
    );

    Ok(AppState {
        registry,
        monitor,
        recovery,
        breakers,
        vnc_port_name: config.quality.vnc_port_name.clone(),
        bridge_connect_timeout: Duration::from_secs(config.bridge.connect_timeout_secs),
        frame_threshold: config.bridge.frame_threshold_bytes,
    })
}
