//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use chatdesk_store::StoreError;

use crate::routes::ws::ValidationError;

/// Server error type.
///
/// Socket handlers surface these to the originating client as
/// `message:error`; HTTP routes render them through [`IntoResponse`].
#[derive(Debug, Error)]
pub enum ServerError {
    /// Inbound payload failed schema or semantic validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced conversation or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request is well-formed but not allowed in the current state.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Stable code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Validation(_) => "validation_error",
            ServerError::NotFound(_) => "not_found",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Storage(_) => "storage_error",
            ServerError::Internal(_) => "internal_error",
            ServerError::Serialization(_) => "serialization_error",
            ServerError::Config(_) => "config_error",
        }
    }

    /// Whether the failure was caused by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Validation(_) | ServerError::NotFound(_) | ServerError::BadRequest(_)
        )
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ServerError::NotFound(msg),
            other => ServerError::Storage(other.to_string()),
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::Validation(e.to_string())
    }
}

impl From<chatdesk_config::ConfigError> for ServerError {
    fn from(e: chatdesk_config::ConfigError) -> Self {
        ServerError::Config(e.to_string())
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Validation(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Internal(_) | ServerError::Serialization(_) | ServerError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let code = self.code();
        let message = self.to_string();

        if self.is_client_error() {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        } else {
            tracing::error!(status = %status, code, error = %message, "Server error");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err: ServerError = StoreError::NotFound("conversation conv-9".to_string()).into();
        assert!(matches!(err, ServerError::NotFound(_)));
        assert!(err.is_client_error());

        let err: ServerError = StoreError::Unavailable("database offline".to_string()).into();
        assert!(matches!(err, ServerError::Storage(_)));
        assert_eq!(err.code(), "storage_error");
    }

    #[test]
    fn test_into_response_status_codes() {
        let response = ServerError::NotFound("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ServerError::Validation("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServerError::Internal("x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
