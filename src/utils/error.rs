//! Error handling module
//!
//! Defines the relay error taxonomy and the wire shapes it is rendered
//! into. The shape is chosen once at the handler boundary; everything
//! below the handlers deals only in `RelayError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request validation failed
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// Request/response conversion failed
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// The channel type does not support the requested mode
    #[error("Channel type {channel_type} does not support {mode}")]
    UnsupportedMode { channel_type: String, mode: String },

    /// Error reported by the upstream provider, already normalized
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        error_type: String,
        message: String,
        code: Option<String>,
    },

    /// Upstream returned a body the adaptor could not interpret
    #[error("Bad upstream response: {0}")]
    BadResponse(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, please try again later")]
    RateLimit,

    /// Request or job timed out
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Wire shape an error is rendered into, picked per endpoint family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorShape {
    /// `{"error": {"message", "type", "code"}}`
    OpenAi,
    /// `{"type": "error", "error": {"type", "message"}}`
    Anthropic,
    /// `{"code", "message"}` flat body used by async job endpoints
    Video,
}

impl RelayError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            RelayError::Validation(_) | RelayError::UnsupportedMode { .. } => {
                StatusCode::BAD_REQUEST
            }
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::BadResponse(_) | RelayError::WebSocket(_) => StatusCode::BAD_GATEWAY,
            RelayError::Config(_)
            | RelayError::HttpClient(_)
            | RelayError::Serialization(_)
            | RelayError::Conversion(_)
            | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string
    pub fn error_type(&self) -> &str {
        match self {
            RelayError::Authentication(_) => "authentication_error",
            RelayError::Validation(_) | RelayError::UnsupportedMode { .. } => {
                "invalid_request_error"
            }
            RelayError::NotFound(_) => "not_found_error",
            RelayError::RateLimit => "rate_limit_error",
            RelayError::Timeout(_) => "timeout_error",
            RelayError::Upstream { error_type, .. } => error_type,
            RelayError::BadResponse(_) => "bad_response",
            RelayError::Config(_)
            | RelayError::HttpClient(_)
            | RelayError::Serialization(_)
            | RelayError::Conversion(_)
            | RelayError::WebSocket(_)
            | RelayError::Internal(_) => "aiproxy_error",
        }
    }

    /// Provider-assigned error code, when one survived normalization
    pub fn code(&self) -> Option<&str> {
        match self {
            RelayError::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether detailed error information should be logged
    pub fn should_log_details(&self) -> bool {
        !matches!(self, RelayError::Authentication(_))
    }

    /// Render the error body in the given wire shape
    pub fn to_wire(&self, shape: ErrorShape) -> serde_json::Value {
        match shape {
            ErrorShape::OpenAi => serde_json::json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "code": self.code(),
                }
            }),
            ErrorShape::Anthropic => serde_json::json!({
                "type": "error",
                "error": {
                    "type": self.error_type(),
                    "message": self.to_string(),
                }
            }),
            ErrorShape::Video => serde_json::json!({
                "code": self.code().unwrap_or_else(|| self.error_type()),
                "message": self.to_string(),
            }),
        }
    }

    /// Render into an HTTP response in the given shape
    pub fn into_shaped_response(self, shape: ErrorShape) -> Response {
        let status = self.status_code();
        if self.should_log_details() {
            tracing::error!("Relay error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self.error_type(), status);
        }
        (status, Json(self.to_wire(shape))).into_response()
    }
}

/// Errors returned without an explicit shape take the OpenAI shape
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        self.into_shaped_response(ErrorShape::OpenAi)
    }
}

/// Result type alias
pub type RelayResult<T> = Result<T, RelayError>;

/// Error context extension trait
pub trait ErrorContext<T> {
    /// Add validation error context
    fn validation_context(self, message: &str) -> RelayResult<T>;

    /// Add conversion error context
    fn conversion_context(self, message: &str) -> RelayResult<T>;

    /// Add internal error context
    fn internal_context(self, message: &str) -> RelayResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn validation_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Validation(format!("{}: {}", message, e)))
    }

    fn conversion_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Conversion(format!("{}: {}", message, e)))
    }

    fn internal_context(self, message: &str) -> RelayResult<T> {
        self.map_err(|e| RelayError::Internal(format!("{}: {}", message, e)))
    }
}
