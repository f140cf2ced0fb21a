// Module: http
// HTTP/JSON REST API plus the WebSocket bridge endpoint

pub mod bridge;
pub mod error;
pub mod health;
pub mod instances;
pub mod metrics;
pub mod quality;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vncfleet_core::resilience::BreakerManager;
use vncfleet_discovery::InstanceRegistry;
use vncfleet_quality::{QualityMonitor, RecoveryEngine};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
    pub monitor: Arc<QualityMonitor>,
    pub recovery: Arc<RecoveryEngine>,
    pub breakers: Arc<BreakerManager>,
    /// Named port the bridge and probes connect to.
    pub vnc_port_name: String,
    pub bridge_connect_timeout: Duration,
    pub frame_threshold: usize,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Health check endpoints (for monitoring probes)
        .merge(health::create_health_router())
        // Instance registry routes
        .route("/api/instances", get(instances::list_instances))
        .route(
            "/api/instances/provisioned",
            get(instances::list_provisioned),
        )
        .route("/api/instances/refresh", post(instances::refresh))
        .route("/api/instances/{id}", get(instances::get_instance))
        // Quality monitor routes
        .route("/api/quality/metrics", get(quality::all_metrics))
        .route("/api/quality/metrics/{id}", get(quality::instance_metrics))
        .route("/api/quality/summary", get(quality::summary))
        .route("/api/quality/deep-health", get(quality::deep_health_all))
        .route(
            "/api/quality/deep-health/{id}",
            get(quality::deep_health_instance),
        )
        .route("/api/quality/recover/{id}", post(quality::recover))
        .route("/api/quality/monitor/start", post(quality::start_monitor))
        .route("/api/quality/monitor/stop", post(quality::stop_monitor))
        // WebSocket bridge to an instance's protocol port
        .route("/proxy/vnc/{id}", get(bridge::vnc_bridge_handler))
        // Prometheus exposition
        .route("/metrics", get(metrics::prometheus_metrics));

    // Apply layers before state
    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
