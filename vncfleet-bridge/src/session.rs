//! Bridge session lifecycle
//!
//! One session per client connection. The target instance is resolved once
//! at creation; later registry changes do not affect a live session. The
//! closed flag makes teardown idempotent so the active-session gauge
//! decrements exactly once no matter which side initiates the close.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;

use vncfleet_core::metrics::bridge as bridge_metrics;
use vncfleet_core::{Error, Result};
use vncfleet_discovery::{Instance, InstanceRegistry};

/// Session lifecycle position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Connecting,
    Relaying,
    Closed,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Relaying,
            3 => Self::Closed,
            _ => Self::Pending,
        }
    }
}

/// Resolve a bridge target before any backend work happens.
///
/// Unknown ids and instances without the protocol port are rejected here,
/// with zero connection attempts against the fleet.
pub async fn resolve_target(
    registry: &InstanceRegistry,
    instance_id: &str,
    port_name: &str,
) -> Result<(Instance, String)> {
    let Some(instance) = registry.get_instance_by_id(instance_id).await else {
        bridge_metrics::REJECTED_TOTAL.inc();
        tracing::warn!(instance_id = %instance_id, "Bridge request for unknown instance");
        return Err(Error::NotFound(instance_id.to_string()));
    };
    let Some(addr) = instance.connect_addr(port_name) else {
        bridge_metrics::REJECTED_TOTAL.inc();
        tracing::warn!(
            instance_id = %instance_id,
            port = %port_name,
            "Bridge target does not publish the protocol port"
        );
        return Err(Error::NotFound(format!(
            "{instance_id} has no '{port_name}' port"
        )));
    };
    Ok((instance, addr))
}

/// State and counters for one client's relay
pub struct BridgeSession {
    instance_id: String,
    state: AtomicU8,
    closed: AtomicBool,
    client_to_backend: AtomicU64,
    backend_to_client: AtomicU64,
    frames: AtomicU64,
    frame_threshold: usize,
}

impl BridgeSession {
    #[must_use]
    pub fn new(instance_id: &str, frame_threshold: usize) -> Self {
        bridge_metrics::ACTIVE_SESSIONS.inc();
        Self {
            instance_id: instance_id.to_string(),
            state: AtomicU8::new(SessionState::Pending as u8),
            closed: AtomicBool::new(false),
            client_to_backend: AtomicU64::new(0),
            backend_to_client: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            frame_threshold,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Open the backend TCP connection with a bounded timeout.
    pub async fn connect_backend(&self, addr: &str, timeout: Duration) -> Result<TcpStream> {
        self.set_state(SessionState::Connecting);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.close();
                return Err(Error::Transport(e));
            }
            Err(_) => {
                self.close();
                return Err(Error::ProbeTimeout(timeout));
            }
        };
        stream.set_nodelay(true).map_err(Error::Transport)?;
        self.set_state(SessionState::Relaying);
        tracing::debug!(
            instance_id = %self.instance_id,
            backend = %addr,
            "Bridge session relaying"
        );
        Ok(stream)
    }

    pub(crate) fn record_client_to_backend(&self, bytes: usize) {
        self.client_to_backend
            .fetch_add(bytes as u64, Ordering::Relaxed);
        bridge_metrics::BYTES_TOTAL
            .with_label_values(&["client_to_backend"])
            .inc_by(bytes as f64);
    }

    pub(crate) fn record_backend_to_client(&self, bytes: usize) {
        self.backend_to_client
            .fetch_add(bytes as u64, Ordering::Relaxed);
        bridge_metrics::BYTES_TOTAL
            .with_label_values(&["backend_to_client"])
            .inc_by(bytes as f64);
        if bytes >= self.frame_threshold {
            self.frames.fetch_add(1, Ordering::Relaxed);
            bridge_metrics::FRAMES_TOTAL.inc();
        }
    }

    #[must_use]
    pub fn bytes_client_to_backend(&self) -> u64 {
        self.client_to_backend.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_backend_to_client(&self) -> u64 {
        self.backend_to_client.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Idempotent teardown: the first call wins, later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(SessionState::Closed);
        bridge_metrics::ACTIVE_SESSIONS.dec();
        tracing::info!(
            instance_id = %self.instance_id,
            client_to_backend = self.bytes_client_to_backend(),
            backend_to_client = self.bytes_backend_to_client(),
            frames = self.frames(),
            "Bridge session closed"
        );
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        // Covers panics and early returns between creation and close.
        self.close();
    }
}
