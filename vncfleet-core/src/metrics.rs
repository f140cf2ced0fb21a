//! Prometheus metrics for the control plane
//!
//! All metrics are registered into a single registry and exposed via the
//! /metrics endpoint for Prometheus scraping.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, CounterVec, Encoder, Histogram, IntCounter, IntGauge,
    IntGaugeVec, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Bridge session instrumentation
pub mod bridge {
    use super::{
        register_counter_vec_with_registry, register_int_counter_with_registry,
        register_int_gauge_with_registry, CounterVec, IntCounter, IntGauge, REGISTRY,
    };

    /// Currently relaying bridge sessions
    pub static ACTIVE_SESSIONS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "bridge_active_sessions",
            "Current number of active bridge sessions",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_SESSIONS")
    });

    /// Total bytes relayed, labelled by direction
    pub static BYTES_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "bridge_bytes_total",
            "Total bytes relayed through bridge sessions",
            &["direction"],
            REGISTRY.clone()
        )
        .expect("Failed to register BYTES_TOTAL")
    });

    /// Coarse frame counter (relay chunks above the size threshold)
    pub static FRAMES_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "bridge_frames_total",
            "Coarse count of framebuffer-sized relay chunks",
            REGISTRY.clone()
        )
        .expect("Failed to register FRAMES_TOTAL")
    });

    /// Connections rejected before any backend attempt
    pub static REJECTED_TOTAL: std::sync::LazyLock<IntCounter> = std::sync::LazyLock::new(|| {
        register_int_counter_with_registry!(
            "bridge_rejected_total",
            "Bridge connections rejected at resolution time",
            REGISTRY.clone()
        )
        .expect("Failed to register REJECTED_TOTAL")
    });
}

/// Discovery and registry instrumentation
pub mod discovery {
    use super::{
        register_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec, IntGauge,
        REGISTRY,
    };

    /// Instances in the latest discovery snapshot
    pub static DISCOVERED_INSTANCES: std::sync::LazyLock<IntGauge> =
        std::sync::LazyLock::new(|| {
            register_int_gauge_with_registry!(
                "discovery_instances",
                "Instances in the latest discovery snapshot",
                REGISTRY.clone()
            )
            .expect("Failed to register DISCOVERED_INSTANCES")
        });

    /// Discovery refresh outcomes
    pub static REFRESH_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "discovery_refresh_total",
            "Discovery refresh cycles by outcome",
            &["result"],
            REGISTRY.clone()
        )
        .expect("Failed to register REFRESH_TOTAL")
    });
}

/// Quality monitor instrumentation
pub mod quality {
    use super::{
        register_histogram_with_registry, register_int_gauge_vec_with_registry, Histogram,
        IntGaugeVec, REGISTRY,
    };

    /// Fleet health distribution by probe state
    pub static INSTANCE_HEALTH: std::sync::LazyLock<IntGaugeVec> = std::sync::LazyLock::new(|| {
        register_int_gauge_vec_with_registry!(
            "quality_instance_health",
            "Instances per health state as of the latest probe cycle",
            &["state"],
            REGISTRY.clone()
        )
        .expect("Failed to register INSTANCE_HEALTH")
    });

    /// Full probe cycle duration
    pub static PROBE_CYCLE_DURATION: std::sync::LazyLock<Histogram> =
        std::sync::LazyLock::new(|| {
            register_histogram_with_registry!(
                "quality_probe_cycle_duration_seconds",
                "Duration of a full fleet probe cycle",
                REGISTRY.clone()
            )
            .expect("Failed to register PROBE_CYCLE_DURATION")
        });
}

/// Resilience wrapper instrumentation
pub mod resilience {
    use super::{register_int_gauge_vec_with_registry, IntGaugeVec, REGISTRY};

    /// Breaker state per operation name (0 = closed, 1 = half-open, 2 = open)
    pub static BREAKER_STATE: std::sync::LazyLock<IntGaugeVec> = std::sync::LazyLock::new(|| {
        register_int_gauge_vec_with_registry!(
            "breaker_state",
            "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            &["name"],
            REGISTRY.clone()
        )
        .expect("Failed to register BREAKER_STATE")
    });
}

/// Expose metrics in Prometheus format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        bridge::ACTIVE_SESSIONS.set(2);
        bridge::BYTES_TOTAL
            .with_label_values(&["client_to_backend"])
            .inc_by(1024.0);
        quality::INSTANCE_HEALTH.with_label_values(&["healthy"]).set(3);

        let output = gather_metrics().expect("gather");
        assert!(output.contains("bridge_active_sessions"));
        assert!(output.contains("bridge_bytes_total"));
        assert!(output.contains("quality_instance_health"));
    }
}
