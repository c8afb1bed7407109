//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its
//! translation into HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use unisphere_core::ports::PortError;
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::identity::TokenError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a rejected or unusable credential.
    #[error("Token Error: {0}")]
    Token(#[from] TokenError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server is shutting down and refuses new work.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// User-visible failure body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Port(PortError::BadRequest(message.into()))
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Port(e) => {
                let status = match e {
                    PortError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    PortError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                    PortError::Forbidden(_) => StatusCode::FORBIDDEN,
                    PortError::NotFound(_) | PortError::ForeignKey(_) => StatusCode::NOT_FOUND,
                    PortError::Conflict(_) => StatusCode::CONFLICT,
                    PortError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                    PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code())
            }
            ApiError::Token(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal causes go to the log, never into the body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            match &self {
                ApiError::Port(e) => port_message(e),
                other => other.to_string(),
            }
        };

        let body = ErrorBody {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn port_message(e: &PortError) -> String {
    match e {
        PortError::BadRequest(m)
        | PortError::Unauthorized(m)
        | PortError::Forbidden(m)
        | PortError::NotFound(m)
        | PortError::Conflict(m)
        | PortError::PayloadTooLarge(m)
        | PortError::ForeignKey(m)
        | PortError::Unexpected(m) => m.clone(),
    }
}
