//! MCP session management.
//!
//! The session registry maps identifiers assigned during initialization to
//! their transport handles. The registry is mutated concurrently by
//! request handlers (insert, lookup, remove) and the shutdown path (bulk
//! close); every mutation is a single critical section under the lock, with
//! no await points held across it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::mcp::engine::{JsonRpcRequest, JsonRpcResponse, McpEngine};
use crate::mcp::transport::McpTransport;

/// An MCP session: one client's continuous interaction with the server.
///
/// The engine lives on the detached task spawned at connect time; the
/// transport is the handle everything else shares.
struct Session {
    transport: Arc<McpTransport>,
}

/// Manager for MCP sessions.
///
/// One instance per server; handlers receive it by clone (it is a cheap
/// handle around the shared registry), so independent servers in the same
/// process never share sessions.
#[derive(Clone)]
pub struct McpSessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl McpSessionManager {
    /// Create a new session manager with an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle an initialization request (one carrying no session identifier).
    ///
    /// Creates a fresh transport and engine pair, connects the engine on a
    /// detached task (a connection failure is logged, never surfaced to this
    /// exchange), routes the request through the transport, and registers
    /// the session iff the transport produced an identifier. Returns the
    /// protocol response and the new identifier, if any.
    pub async fn initialize_session(
        &self,
        request: JsonRpcRequest,
    ) -> Result<(Option<JsonRpcResponse>, Option<String>), ServerError> {
        let transport = McpTransport::new();
        self.connect_and_initialize(&transport, request).await
    }

    /// Connect an engine to the given transport and run the initialization
    /// exchange through it.
    ///
    /// Split out of [`initialize_session`] so tests can keep a handle on
    /// the transport.
    async fn connect_and_initialize(
        &self,
        transport: &Arc<McpTransport>,
        request: JsonRpcRequest,
    ) -> Result<(Option<JsonRpcResponse>, Option<String>), ServerError> {
        let engine = McpEngine::new();

        // Fire-and-forget engine connection: deliberately decoupled from
        // this HTTP exchange. The inbound queue buffers the first message
        // until the engine task is running.
        {
            let transport = Arc::clone(transport);
            tokio::spawn(async move {
                if let Err(e) = engine.connect(transport).await {
                    warn!("MCP connection error: {}", e);
                }
            });
        }

        let response = transport.handle_message(request).await?;

        let new_session_id = transport.session_id();
        match new_session_id {
            Some(ref id) => {
                {
                    let mut sessions = self.sessions.write().await;
                    sessions.insert(
                        id.clone(),
                        Session {
                            transport: Arc::clone(transport),
                        },
                    );
                }
                info!("MCP: New session initialized: {}", id);
                self.watch_for_close(id.clone(), transport);
            }
            None => {
                // Rejected initialization: nothing was registered, so
                // nothing will ever close this transport. Close it here to
                // end the engine task and release its channels.
                transport.close();
            }
        }

        Ok((response, new_session_id))
    }

    /// Handle a request carrying an existing session identifier, delegating
    /// the exchange to that session's transport unchanged.
    pub async fn handle_request(
        &self,
        session_id: &str,
        request: JsonRpcRequest,
    ) -> Result<Option<JsonRpcResponse>, ServerError> {
        let transport = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .map(|s| Arc::clone(&s.transport))
                .ok_or(ServerError::SessionNotFound)?
        };

        transport.handle_message(request).await
    }

    /// The transport handle for a session, if registered. The SSE handler
    /// subscribes to the push channel through it.
    pub async fn transport(&self, session_id: &str) -> Option<Arc<McpTransport>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|s| Arc::clone(&s.transport))
    }

    /// Check if a session exists.
    pub async fn session_exists(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(session_id)
    }

    /// Terminate a session on client request.
    pub async fn terminate(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id)
        };
        match removed {
            Some(session) => {
                session.transport.close();
                info!("MCP: Session terminated: {}", session_id);
                true
            }
            None => false,
        }
    }

    /// Close all active sessions. Invoked during shutdown drain.
    ///
    /// All transports are closed concurrently, then the registry is
    /// cleared. Idempotent when no sessions exist.
    pub async fn close_all(&self) {
        let transports: Vec<Arc<McpTransport>> = {
            let mut sessions = self.sessions.write().await;
            sessions
                .drain()
                .map(|(_, session)| session.transport)
                .collect()
        };

        if transports.is_empty() {
            return;
        }

        let count = transports.len();
        futures::future::join_all(
            transports
                .into_iter()
                .map(|transport| async move { transport.close() }),
        )
        .await;
        info!("MCP: Closed {} session(s)", count);
    }

    /// Number of active sessions, for diagnostics and tests.
    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Spawn the close watcher for a newly registered session.
    ///
    /// The watcher fires exactly once, when the transport's closure token
    /// is cancelled, and removes the session from the registry. After the
    /// removal the identifier is unknown; a later request reusing it is
    /// answered with not-found, never silently reattached.
    fn watch_for_close(&self, session_id: String, transport: &Arc<McpTransport>) {
        let sessions = Arc::clone(&self.sessions);
        let closed = transport.closed_token();
        tokio::spawn(async move {
            closed.cancelled().await;
            let removed = {
                let mut sessions = sessions.write().await;
                sessions.remove(&session_id).is_some()
            };
            if removed {
                debug!("MCP: Session removed after transport closure: {}", session_id);
            }
        });
    }
}

impl Default for McpSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::TransportGuard;
    use serde_json::json;
    use std::time::Duration;

    fn init_request() -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: "initialize".to_string(),
            params: Some(json!({ "protocolVersion": "2025-03-26" })),
        }
    }

    fn tools_list_request() -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(2)),
            method: "tools/list".to_string(),
            params: None,
        }
    }

    async fn wait_for_removal(manager: &McpSessionManager, id: &str) {
        // The watcher task runs asynchronously after closure; poll briefly.
        for _ in 0..100 {
            if !manager.session_exists(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {} was not removed after transport closure", id);
    }

    #[tokio::test]
    async fn test_initialize_registers_session() {
        let manager = McpSessionManager::new();
        let (response, id) = manager.initialize_session(init_request()).await.unwrap();

        assert!(response.unwrap().is_success());
        let id = id.expect("session id assigned");
        assert!(manager.session_exists(&id).await);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_non_initialize_first_message_registers_nothing() {
        let manager = McpSessionManager::new();
        let (response, id) = manager
            .initialize_session(tools_list_request())
            .await
            .unwrap();

        assert_eq!(response.unwrap().error.unwrap().code, -32002);
        assert!(id.is_none());
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_initialization_closes_transport() {
        let manager = McpSessionManager::new();
        let transport = crate::mcp::transport::McpTransport::new();

        let (response, id) = manager
            .connect_and_initialize(&transport, tools_list_request())
            .await
            .unwrap();

        assert_eq!(response.unwrap().error.unwrap().code, -32002);
        assert!(id.is_none());
        // The transport is closed so the engine task ends with it.
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_accepted_initialization_keeps_transport_open() {
        let manager = McpSessionManager::new();
        let transport = crate::mcp::transport::McpTransport::new();

        let (_, id) = manager
            .connect_and_initialize(&transport, init_request())
            .await
            .unwrap();

        assert!(id.is_some());
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_lookup_unknown_session_fails() {
        let manager = McpSessionManager::new();
        let result = manager
            .handle_request("invalid-session-id", tools_list_request())
            .await;
        assert!(matches!(result, Err(ServerError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_request_delegated_to_session_transport() {
        let manager = McpSessionManager::new();
        let (_, id) = manager.initialize_session(init_request()).await.unwrap();
        let id = id.unwrap();

        let response = manager
            .handle_request(&id, tools_list_request())
            .await
            .unwrap()
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_transport_closure_removes_session() {
        let manager = McpSessionManager::new();
        let (_, id) = manager.initialize_session(init_request()).await.unwrap();
        let id = id.unwrap();

        let transport = manager.transport(&id).await.unwrap();
        transport.close();

        wait_for_removal(&manager, &id).await;

        let result = manager.handle_request(&id, tools_list_request()).await;
        assert!(matches!(result, Err(ServerError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_sse_guard_drop_removes_session() {
        let manager = McpSessionManager::new();
        let (_, id) = manager.initialize_session(init_request()).await.unwrap();
        let id = id.unwrap();

        let transport = manager.transport(&id).await.unwrap();
        let guard = TransportGuard::new(transport);
        drop(guard);

        wait_for_removal(&manager, &id).await;
    }

    #[tokio::test]
    async fn test_close_all_clears_registry() {
        let manager = McpSessionManager::new();
        for _ in 0..3 {
            manager.initialize_session(init_request()).await.unwrap();
        }
        assert_eq!(manager.session_count().await, 3);

        manager.close_all().await;
        assert_eq!(manager.session_count().await, 0);

        // Idempotent with nothing to close.
        manager.close_all().await;
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_terminate_session() {
        let manager = McpSessionManager::new();
        let (_, id) = manager.initialize_session(init_request()).await.unwrap();
        let id = id.unwrap();

        assert!(manager.terminate(&id).await);
        assert!(!manager.terminate(&id).await);
        assert!(!manager.session_exists(&id).await);
    }

    #[tokio::test]
    async fn test_concurrent_initializations_register_distinct_sessions() {
        let manager = McpSessionManager::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .initialize_session(init_request())
                        .await
                        .unwrap()
                        .1
                        .unwrap()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(manager.session_count().await, 8);

        for id in &ids {
            assert!(manager.session_exists(id).await);
        }
    }
}
