//! WebSocket bridge endpoint
//!
//! Resolution happens before the upgrade so an unknown instance id is
//! rejected with a normal HTTP error and no backend connection is attempted.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;

use vncfleet_bridge::{relay_websocket, resolve_target, BridgeSession};

use crate::http::{AppError, AppResult, AppState};

/// GET /proxy/vnc/{id}
pub async fn vnc_bridge_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let (instance, addr) = resolve_target(&state.registry, &id, &state.vnc_port_name)
        .await
        .map_err(|e| AppError::not_found(e.to_string()))?;

    Ok(ws.on_upgrade(move |socket| async move {
        let session = BridgeSession::new(&instance.id, state.frame_threshold);
        match session
            .connect_backend(&addr, state.bridge_connect_timeout)
            .await
        {
            Ok(backend) => relay_websocket(&session, socket, backend).await,
            Err(e) => {
                tracing::warn!(
                    instance_id = %instance.id,
                    backend = %addr,
                    error = %e,
                    "Bridge backend connect failed"
                );
            }
        }
    }))
}
