//! Liveness endpoint
//!
//! Kept apart from the `/api` routes so orchestrator probes stay cheap and
//! never touch the registry or monitor.

use axum::{response::IntoResponse, routing::get, Router};

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Process liveness only; says nothing about fleet health.
pub async fn health_check() -> impl IntoResponse {
    "OK"
}
