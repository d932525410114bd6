//! MCP Streamable HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests (returns JSON or SSE)
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session

use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::mcp::transport::{McpEvent, TransportGuard};
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpSessionManager};

/// Header name for the MCP session ID.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Extract the session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Whether the client asked for the reply as an event stream rather than
/// plain JSON.
fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| {
            accept.contains("text/event-stream") && !accept.contains("application/json")
        })
        .unwrap_or(false)
}

/// Attach the session ID response header, if one is known.
fn set_session_header(response: &mut Response, session_id: Option<&str>) {
    if let Some(sid) = session_id {
        if let Ok(hv) = HeaderValue::from_str(sid) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
        }
    }
}

/// Render a protocol reply as the HTTP response: 202 for notifications,
/// otherwise a JSON body or a single-event SSE stream per the Accept header.
fn protocol_response(
    response: Option<JsonRpcResponse>,
    session_id: Option<&str>,
    headers: &HeaderMap,
) -> Response {
    let mut resp = match response {
        None => StatusCode::ACCEPTED.into_response(),
        Some(response) if wants_event_stream(headers) => {
            let payload = serde_json::to_string(&response).unwrap_or_default();
            let stream =
                futures::stream::iter([Ok::<_, Infallible>(Event::default().data(payload))]);
            Sse::new(stream).into_response()
        }
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
    };
    set_session_header(&mut resp, session_id);
    resp
}

/// POST /mcp - Handle JSON-RPC requests.
///
/// A request without a session header is an initialization request: it gets
/// a fresh transport and engine, and the `Mcp-Session-Id` header of the
/// response carries the new identifier. Subsequent requests must present
/// that header and are delegated to the session's transport.
pub async fn mcp_post(
    Extension(sessions): Extension<McpSessionManager>,
    headers: HeaderMap,
    request: Result<Json<JsonRpcRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(json) => json,
        Err(rejection) => {
            debug!("MCP POST: rejected body: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON body"})),
            )
                .into_response();
        }
    };

    let session_id = get_session_id(&headers);
    debug!(
        "MCP POST: method={}, session={:?}",
        request.method, session_id
    );

    if let Some(sid) = session_id {
        return match sessions.handle_request(&sid, request).await {
            Ok(response) => protocol_response(response, Some(&sid), &headers),
            Err(e) => e.into_response(),
        };
    }

    // No session header: initialization request.
    match sessions.initialize_session(request).await {
        Ok((response, new_session_id)) => {
            if new_session_id.is_none() {
                // The transport rejected the message (not a valid
                // initialization); nothing was registered.
                if let Some(response) = response {
                    return (StatusCode::BAD_REQUEST, Json(response)).into_response();
                }
                return StatusCode::ACCEPTED.into_response();
            }
            protocol_response(response, new_session_id.as_deref(), &headers)
        }
        Err(e) => e.into_response(),
    }
}

/// GET /mcp - Open SSE stream for server-initiated messages.
///
/// The stream carries one JSON payload per `data:` line, ends when the
/// transport closes, and reports transport closure when the client
/// disconnects.
pub async fn mcp_get(
    Extension(sessions): Extension<McpSessionManager>,
    headers: HeaderMap,
) -> Response {
    let session_id = match get_session_id(&headers) {
        Some(id) => id,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Mcp-Session-Id header required for SSE stream"})),
            )
                .into_response();
        }
    };

    let transport = match sessions.transport(&session_id).await {
        Some(transport) => transport,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Session not found"})),
            )
                .into_response();
        }
    };

    let session_rx = transport.subscribe();
    let closed = transport.closed_token();
    let guard = TransportGuard::new(transport);

    info!("MCP: SSE stream opened for session {}", session_id);

    // The guard lives inside the closure: dropping the stream (client
    // disconnect) closes the transport, which removes the session.
    let stream = BroadcastStream::new(session_rx)
        .filter_map(move |result| {
            let _keep = &guard;
            futures::future::ready(match result {
                Ok(McpEvent::JsonRpc(json)) => {
                    Some(Ok::<_, Infallible>(Event::default().data(json)))
                }
                Err(_) => None, // Lagged
            })
        })
        .take_until(closed.cancelled_owned());

    let mut resp = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
        .into_response();
    set_session_header(&mut resp, Some(&session_id));
    resp
}

/// DELETE /mcp - Terminate a session.
///
/// Terminates the session identified by the `Mcp-Session-Id` header.
pub async fn mcp_delete(
    Extension(sessions): Extension<McpSessionManager>,
    headers: HeaderMap,
) -> Response {
    let session_id = match get_session_id(&headers) {
        Some(id) => id,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Mcp-Session-Id header required"})),
            )
                .into_response();
        }
    };

    if sessions.terminate(&session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found"})),
        )
            .into_response()
    }
}
