//! API error types and response handling
//!
//! One error type for all handlers, with automatic conversion to the HTTP
//! status contract the upload clients implement: 401 refresh-and-retry,
//! 413 resplit, 429 honor backoff, 5xx retry with backoff.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - malformed envelope.
    BadRequest { error_code: String, message: String },

    /// 401 Unauthorized - missing/unknown bearer token.
    Unauthorized,

    /// 403 Forbidden - envelope device does not match the credential.
    DeviceMismatch,

    /// 413 Payload Too Large - batch exceeds a ceiling, client must resplit.
    PayloadTooLarge { message: String },

    /// 429 Too Many Requests - queue is backed up past the hard ceiling.
    Throttled { backoff_seconds: u64 },

    /// 500 Internal Server Error.
    Internal { message: String },

    /// 503 Service Unavailable - the durable queue rejected the append.
    QueueUnavailable,
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Retry hint, present on 429 only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_seconds: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    backoff_seconds: None,
                },
            ),

            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "unauthorized".to_string(),
                    message: "Invalid or expired device token".to_string(),
                    backoff_seconds: None,
                },
            ),

            Self::DeviceMismatch => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: "device_mismatch".to_string(),
                    message: "Device ID does not match the authenticated device".to_string(),
                    backoff_seconds: None,
                },
            ),

            Self::PayloadTooLarge { message } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorResponse {
                    error: "payload_too_large".to_string(),
                    message,
                    backoff_seconds: None,
                },
            ),

            Self::Throttled { backoff_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse {
                    error: "throttled".to_string(),
                    message: "Ingest queue is backed up; retry later".to_string(),
                    backoff_seconds: Some(backoff_seconds),
                },
            ),

            Self::Internal { message } => {
                tracing::error!(%message, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal_error".to_string(),
                        message,
                        backoff_seconds: None,
                    },
                )
            }

            Self::QueueUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: "queue_unavailable".to_string(),
                    message: "Event storage is temporarily unavailable; retry later".to_string(),
                    backoff_seconds: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::DeviceMismatch => write!(f, "Forbidden: device mismatch"),
            Self::PayloadTooLarge { message } => write!(f, "Payload Too Large: {message}"),
            Self::Throttled { backoff_seconds } => {
                write!(f, "Throttled: retry in {backoff_seconds}s")
            }
            Self::Internal { message } => write!(f, "Internal Error: {message}"),
            Self::QueueUnavailable => write!(f, "Queue Unavailable"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<screentrace_core::Error> for ApiError {
    fn from(err: screentrace_core::Error) -> Self {
        match err {
            screentrace_core::Error::Queue(_) => Self::QueueUnavailable,
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}
