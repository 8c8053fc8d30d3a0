// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the data model, transport and session layers.

use thiserror::Error;

/// Rejected input while building nodes, priorities or indexes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid child key '{0}': keys must be non-empty and may not contain '/'")]
    InvalidKey(String),
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),
    #[error("Invalid index: {0}")]
    InvalidIndex(String),
}

/// Failures of a single transport attempt.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Timed out connecting after {0:?}")]
    ConnectTimeout(std::time::Duration),
    #[error("Failed to parse server message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Server message was not a JSON object")]
    NotAnObject,
    #[error("Invalid frame count: {0}")]
    InvalidFrameCount(i64),
    #[error("Socket closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

/// The auth token provider could not produce a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to fetch auth token: {0}")]
pub struct TokenError(pub String);

/// Precondition failures reported synchronously by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session has been shut down")]
    ShutDown,
    #[error("A listen is already registered for {path} with identical query parameters")]
    DuplicateListen { path: String },
    #[error("Cannot {operation} while session is {state}")]
    InvalidState { operation: &'static str, state: String },
    #[error("Session task is no longer running")]
    ChannelClosed,
}

/// Non-ok completion of a server request, delivered to request callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}{}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
pub struct RequestError {
    /// Server status string, e.g. `permission_denied`, or a local code
    /// such as `disconnected` or `write_canceled`.
    pub code: String,
    pub message: Option<String>,
}

impl RequestError {
    pub fn new(code: impl Into<String>, message: Option<String>) -> Self {
        Self {
            code: code.into(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        assert_eq!(RequestError::new("disconnected", None).to_string(), "disconnected");
        assert_eq!(
            RequestError::new("permission_denied", Some("no access".into())).to_string(),
            "permission_denied (no access)"
        );
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::DuplicateListen { path: "/a".into() };
        assert!(err.to_string().contains("/a"));
        let err = SessionError::InvalidState {
            operation: "initialize",
            state: "Connected".into(),
        };
        assert_eq!(err.to_string(), "Cannot initialize while session is Connected");
    }
}
