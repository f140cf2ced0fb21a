//! Prometheus exposition endpoint

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use vncfleet_core::metrics::gather_metrics;

/// GET /metrics
pub async fn prometheus_metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
