//! Error types shared across the control plane

use std::time::Duration;
use thiserror::Error;

/// Control-plane error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Circuit breaker '{0}' is open")]
    BreakerOpen(String),

    #[error("Recovery attempts exhausted for instance {0}")]
    RecoveryExhausted(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
