//! Protocol bridge
//!
//! Relays opaque bytes between a WebSocket client and one fleet instance's
//! protocol port. The bridge never interprets the payload; it only counts
//! what passes through and tears the pair down symmetrically when either
//! side goes away.

pub mod relay;
pub mod session;

pub use relay::{relay_streams, relay_websocket};
pub use session::{resolve_target, BridgeSession, SessionState};

#[cfg(test)]
pub(crate) mod test_support {
    /// Serializes tests that assert on the shared active-session gauge.
    pub static GAUGE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}
