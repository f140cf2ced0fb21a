//! HTTP surface for the fleet control plane
//!
//! Exposes the registry, the quality monitor and the protocol bridge over
//! axum, plus Prometheus exposition. The binary in `main.rs` wires the
//! components together; everything here is reusable from tests.

pub mod bootstrap;
pub mod http;

pub use bootstrap::build_state;
pub use http::{create_router, AppState};
