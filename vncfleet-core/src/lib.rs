//! Shared foundation for the VNC fleet control plane: configuration,
//! error taxonomy, logging, Prometheus metrics and the circuit-breaker
//! resilience wrapper every other crate routes external calls through.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod resilience;

pub use config::Config;
pub use error::{Error, Result};
pub use resilience::{BreakerManager, BreakerOptions, CircuitBreaker};
