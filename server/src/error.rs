//! Error types for the wspub server.
//!
//! The core components never fail: hubs swallow transport errors per
//! connection, and the registrar and token manager report misuse as
//! `Option`/`bool`. [`ServerError`] is what the HTTP layer turns those results
//! into, and it renders itself as a JSON error response.
//!
//! # Example
//!
//! ```rust
//! use axum::http::StatusCode;
//! use wspub_server::error::ServerError;
//!
//! let err = ServerError::stream_not_found("s1");
//! assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
//! assert_eq!(err.to_string(), "stream not found: s1");
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the HTTP routes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// No live stream with this id.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The presented token does not authorize the stream.
    #[error("token is not valid for stream {stream}")]
    Unauthorized {
        /// The stream the caller tried to access.
        stream: String,
    },

    /// WebSocket handshake or protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl ServerError {
    pub fn stream_not_found(stream: impl Into<String>) -> Self {
        Self::StreamNotFound(stream.into())
    }

    pub fn unauthorized(stream: impl Into<String>) -> Self {
        Self::Unauthorized {
            stream: stream.into(),
        }
    }

    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket(message.into())
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StreamNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::WebSocket(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable code for the JSON body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StreamNotFound(_) => "stream_not_found",
            Self::Unauthorized { .. } => "invalid_token",
            Self::WebSocket(_) => "websocket_error",
        }
    }

    /// Returns `true` if the caller made an invalid request.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(self.to_string()).with_code(self.code());
        (status, Json(body)).into_response()
    }
}

/// A specialized Result type for route handlers.
pub type Result<T> = std::result::Result<T, ServerError>;
