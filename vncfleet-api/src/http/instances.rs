//! Instance registry endpoints
//!
//! The list endpoints always answer 200; when dynamic discovery is unhealthy
//! the response envelope says so instead of surfacing an error, so clients
//! keep a usable (possibly static) instance list.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use vncfleet_discovery::Instance;

use crate::http::{AppError, AppResult, AppState};

/// Instance list with provenance
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceListResponse {
    /// `dynamic` when discovery is serving, `fallback` otherwise.
    pub source: &'static str,
    /// Set when the served list did not come from live discovery.
    pub degraded: bool,
    pub count: usize,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub count: usize,
}

async fn envelope(state: &AppState, instances: Vec<Instance>) -> InstanceListResponse {
    let dynamic = state.registry.is_using_dynamic_discovery().await;
    InstanceListResponse {
        source: if dynamic { "dynamic" } else { "fallback" },
        degraded: !dynamic,
        count: instances.len(),
        instances,
    }
}

/// GET /api/instances
pub async fn list_instances(State(state): State<AppState>) -> Json<InstanceListResponse> {
    let instances = state.registry.get_instances().await;
    Json(envelope(&state, instances).await)
}

/// GET /api/instances/provisioned
pub async fn list_provisioned(State(state): State<AppState>) -> Json<InstanceListResponse> {
    let instances = state.registry.get_provisioned_instances().await;
    Json(envelope(&state, instances).await)
}

/// GET /api/instances/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Instance>> {
    state
        .registry
        .get_instance_by_id(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Unknown instance: {id}")))
}

/// POST /api/instances/refresh
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    let count = state.registry.refresh_discovery().await;
    Json(RefreshResponse { count })
}
