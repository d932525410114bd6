//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the rootspace server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address. Fatal at startup.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create the data directory. Fatal at startup.
    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Request carried a session identifier that is not in the registry.
    #[error("Session not found")]
    SessionNotFound,

    /// Request path matched no route.
    #[error("Not found")]
    RouteNotFound,

    /// An engine was already connected to this transport.
    #[error("transport already connected")]
    TransportAlreadyConnected,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::SessionNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Session not found"})),
            )
                .into_response(),
            ServerError::RouteNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Not found"})),
            )
                .into_response(),
            other => {
                // Detail goes to the log, not the client.
                tracing::error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_maps_to_404() {
        let response = ServerError::SessionNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_other_errors_map_to_500() {
        let response = ServerError::TransportAlreadyConnected.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
