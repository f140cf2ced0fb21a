// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert vncfleet_core errors to HTTP errors
impl From<vncfleet_core::Error> for AppError {
    fn from(err: vncfleet_core::Error) -> Self {
        use vncfleet_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::Discovery(msg) => {
                tracing::error!("Discovery error: {}", msg);
                Self::service_unavailable("Discovery unavailable")
            }
            Error::BreakerOpen(name) => {
                Self::service_unavailable(format!("Operation '{name}' temporarily disabled"))
            }
            Error::ProbeTimeout(_) => Self::service_unavailable("Instance did not respond"),
            Error::RecoveryExhausted(msg) => Self::conflict(msg),
            Error::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                Self::internal_server_error("Configuration error")
            }
            Error::Transport(e) => {
                tracing::error!("Transport error: {}", e);
                Self::service_unavailable("Instance unreachable")
            }
            Error::Serialization(msg) => {
                tracing::error!("Serialization error: {}", msg);
                Self::internal_server_error("Data processing error")
            }
        }
    }
}

/// Convert serde_json errors to HTTP errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {err}"))
    }
}
