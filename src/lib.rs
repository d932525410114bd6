//! Rootspace server library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::response::IntoResponse;
use axum::{routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod mcp;
pub mod server;
pub mod version;

use error::ServerError;
use mcp::McpSessionManager;
use version::VERSION;

/// Create the Axum application router with a fresh session manager.
pub fn create_app() -> Router {
    create_app_with_sessions(McpSessionManager::new())
}

/// Create the Axum application router around a given session manager.
///
/// The session manager is owned by the caller, not a process-wide
/// singleton, so independent server instances (and tests) get independent
/// registries. This function is used both by the server and by tests.
pub fn create_app_with_sessions(sessions: McpSessionManager) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("mcp-session-id"),
        ])
        .expose_headers([HeaderName::from_static("mcp-session-id")])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            get(api::mcp::mcp_get)
                .post(api::mcp::mcp_post)
                .delete(api::mcp::mcp_delete),
        )
        .fallback(not_found)
        .layer(Extension(sessions))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": VERSION }))
}

/// Fallback for unmatched routes.
async fn not_found() -> axum::response::Response {
    ServerError::RouteNotFound.into_response()
}
