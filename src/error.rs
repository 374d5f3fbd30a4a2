//! Collaboration error types with HTTP status code mapping.
//!
//! [`CollabError`] is the central error type for the hub. Contract
//! violations (`EventClassMismatch`) are returned to the caller and must
//! not be retried; transport failures are normally observed through
//! connection state, and only surface here when an operation is attempted
//! synchronously (bind, send).

use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::EventClass;
use crate::net::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "connection not found: 5b0f…",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Hub error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                 |
/// |-----------|-------------------|-----------------------------|
/// | 1000–1999 | Contract/Input    | 400 Bad Request             |
/// | 2000–2999 | State/Not Found   | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server            | 500 Internal Server Error   |
/// | 4000–4999 | Transport         | 502 / 503                   |
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// A participant tried to join a coordinator of another event class.
    #[error("event class mismatch: coordinator handles '{expected}', participant declares '{actual}'")]
    EventClassMismatch {
        /// Class of the coordinator.
        expected: EventClass,
        /// Class declared by the participant.
        actual: EventClass,
    },

    /// The wire envelope could not be parsed, or an outgoing message is
    /// not a single line.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// No live connection with the given ID.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection is already closed or failed.
    #[error("connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    /// The server is already accepting connections.
    #[error("server already running")]
    AlreadyRunning,

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Dialing a remote server failed (refused, timeout, DNS).
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an established connection.
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),

    /// The outbound queue of a connection is saturated.
    #[error("outbound queue full for connection {0}")]
    QueueFull(ConnectionId),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollabError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::EventClassMismatch { .. } => 1001,
            Self::InvalidEnvelope(_) => 1002,
            Self::ConnectionNotFound(_) => 2001,
            Self::ConnectionClosed(_) => 2002,
            Self::AlreadyRunning => 2003,
            Self::Internal(_) => 3000,
            Self::Bind { .. } => 3001,
            Self::Connect { .. } => 4001,
            Self::Stream(_) => 4002,
            Self::QueueFull(_) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::EventClassMismatch { .. } | Self::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ConnectionClosed(_) | Self::AlreadyRunning => StatusCode::CONFLICT,
            Self::Bind { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connect { .. } | Self::Stream(_) => StatusCode::BAD_GATEWAY,
            Self::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CollabError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
