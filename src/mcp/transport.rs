//! Streamable HTTP transport adapter.
//!
//! Translates HTTP request/response exchanges into protocol messages for
//! one session. The transport generates the session identifier exactly
//! once, serializes message handling through an inbound queue consumed by
//! the session's engine, and owns the SSE push channel.

use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServerError;
use crate::mcp::engine::{JsonRpcRequest, JsonRpcResponse};

/// Events pushed to MCP clients via SSE.
#[derive(Clone, Debug)]
pub enum McpEvent {
    /// A serialized JSON-RPC message to send to the client.
    JsonRpc(String),
}

/// A protocol message in flight to the engine, paired with its reply slot.
pub type InboundMessage = (JsonRpcRequest, oneshot::Sender<Option<JsonRpcResponse>>);

/// Capacity of the per-session inbound queue.
const INBOUND_QUEUE_SIZE: usize = 32;

/// Capacity of the SSE broadcast channel.
const EVENT_CHANNEL_SIZE: usize = 100;

/// Transport adapter for one MCP session.
pub struct McpTransport {
    /// Assigned once, when the initialization exchange succeeds.
    session_id: OnceLock<String>,
    /// Push channel feeding the session's SSE stream.
    event_tx: broadcast::Sender<McpEvent>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    /// Held until the engine connects and takes it.
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    /// Closure signal. Cancelled exactly when the transport closes;
    /// subscribers (registry watcher, SSE streams) observe it to tear down.
    closed: CancellationToken,
}

impl McpTransport {
    /// Create a transport with no session identifier assigned yet.
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        Arc::new(Self {
            session_id: OnceLock::new(),
            event_tx,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            closed: CancellationToken::new(),
        })
    }

    /// Hand the inbound queue to the connecting engine.
    ///
    /// Returns `None` if an engine already connected.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx
            .lock()
            .expect("inbound receiver lock poisoned")
            .take()
    }

    /// Route one protocol message through this transport and await the reply.
    ///
    /// Messages are queued to the engine and answered in arrival order.
    /// The first message of a session must be `initialize`; anything else is
    /// rejected without reaching the engine and no identifier is assigned.
    /// `None` means the message was a notification.
    pub async fn handle_message(
        &self,
        request: JsonRpcRequest,
    ) -> Result<Option<JsonRpcResponse>, ServerError> {
        if self.closed.is_cancelled() {
            return Err(ServerError::SessionNotFound);
        }

        if self.session_id.get().is_none() && request.method != "initialize" {
            return Ok(Some(JsonRpcResponse::error(
                request.id,
                -32002,
                "Server not initialized",
            )));
        }

        let is_initialize = request.method == "initialize";
        let (reply_tx, reply_rx) = oneshot::channel();

        self.inbound_tx
            .send((request, reply_tx))
            .await
            .map_err(|_| ServerError::SessionNotFound)?;

        let response = reply_rx.await.map_err(|_| ServerError::SessionNotFound)?;

        if is_initialize {
            if let Some(ref resp) = response {
                if resp.is_success() {
                    let assigned = self
                        .session_id
                        .get_or_init(|| Uuid::new_v4().to_string());
                    debug!("MCP: transport assigned session id {}", assigned);
                }
            }
        }

        Ok(response)
    }

    /// The session identifier, once the initialization exchange produced one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.get().cloned()
    }

    /// Subscribe to the push channel for SSE streaming.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.event_tx.subscribe()
    }

    /// Push an event to all SSE subscribers.
    pub fn send(&self, event: McpEvent) -> Result<usize, broadcast::error::SendError<McpEvent>> {
        self.event_tx.send(event)
    }

    /// Close the transport. Idempotent; the closure signal fires once.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the transport has reported closure.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// The closure signal. The session registry and SSE streams subscribe
    /// to this token; it is cancelled on client disconnect, DELETE, or
    /// shutdown drain.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Closes the transport when dropped.
///
/// Attached to a session's SSE stream so that a client disconnect
/// deterministically reports transport closure.
pub struct TransportGuard {
    transport: Arc<McpTransport>,
}

impl TransportGuard {
    pub fn new(transport: Arc<McpTransport>) -> Self {
        Self { transport }
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        self.transport.close();
    }
}
