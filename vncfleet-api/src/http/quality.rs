//! Quality monitor and recovery endpoints

use axum::extract::{Path, State};
use axum::Json;
use futures::future::join_all;
use serde::Serialize;

use vncfleet_core::resilience::BreakerSummary;
use vncfleet_quality::{QualityMetrics, QualitySummary, RecoveryReport};

use crate::http::{AppError, AppResult, AppState};

/// Fleet summary plus the resilience wrapper's view
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub fleet: QualitySummary,
    pub breakers: BreakerSummary,
}

#[derive(Debug, Serialize)]
pub struct MonitorToggleResponse {
    pub running: bool,
    pub changed: bool,
}

/// GET /api/quality/metrics
pub async fn all_metrics(State(state): State<AppState>) -> Json<Vec<QualityMetrics>> {
    Json(state.monitor.latest())
}

/// GET /api/quality/metrics/{id}
pub async fn instance_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<QualityMetrics>> {
    state
        .monitor
        .latest_for(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("No quality metrics for instance: {id}")))
}

/// GET /api/quality/summary
pub async fn summary(State(state): State<AppState>) -> Json<SummaryResponse> {
    Json(SummaryResponse {
        fleet: state.monitor.summary(),
        breakers: state.breakers.summary(),
    })
}

/// GET /api/quality/deep-health
///
/// On-demand probe of every instance the registry serves, independent of the
/// cached monitoring cycle.
pub async fn deep_health_all(State(state): State<AppState>) -> Json<Vec<QualityMetrics>> {
    let instances = state.registry.get_instances().await;
    let results = join_all(instances.iter().map(|i| state.monitor.deep_health(i))).await;
    Json(results)
}

/// GET /api/quality/deep-health/{id}
pub async fn deep_health_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<QualityMetrics>> {
    let instance = state
        .registry
        .get_instance_by_id(&id)
        .await
        .ok_or_else(|| AppError::not_found(format!("Unknown instance: {id}")))?;
    Ok(Json(state.monitor.deep_health(&instance).await))
}

/// POST /api/quality/recover/{id}
///
/// Resets the attempt counter (the external escape hatch from the
/// manual-intervention flag) and runs one recovery synchronously.
pub async fn recover(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<RecoveryReport>> {
    let instance = state
        .registry
        .get_instance_by_id(&id)
        .await
        .ok_or_else(|| AppError::not_found(format!("Unknown instance: {id}")))?;

    // Classify from a fresh probe so the strategy matches the current fault.
    let probe = state.monitor.deep_health(&instance).await;
    let report = state.recovery.recover_now(&instance, probe.failure_type).await;
    Ok(Json(report))
}

/// POST /api/quality/monitor/start
pub async fn start_monitor(State(state): State<AppState>) -> Json<MonitorToggleResponse> {
    let changed = state.monitor.start();
    Json(MonitorToggleResponse {
        running: true,
        changed,
    })
}

/// POST /api/quality/monitor/stop
pub async fn stop_monitor(State(state): State<AppState>) -> Json<MonitorToggleResponse> {
    let changed = state.monitor.stop();
    Json(MonitorToggleResponse {
        running: false,
        changed,
    })
}
