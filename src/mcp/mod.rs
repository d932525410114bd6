//! MCP (Model Context Protocol) Streamable HTTP support.
//!
//! Implements the MCP 2025-03-26 Streamable HTTP transport: JSON-RPC over
//! POST with optional SSE streaming for server-initiated messages.
//!
//! ## Session management
//!
//! Sessions are identified by the `Mcp-Session-Id` header, assigned during
//! initialization and required for subsequent requests. Each session binds
//! one transport adapter to one protocol engine instance; sessions share no
//! mutable protocol state.

pub mod engine;
pub mod session;
pub mod transport;

pub use engine::{JsonRpcRequest, JsonRpcResponse, McpEngine};
pub use session::McpSessionManager;
pub use transport::{McpEvent, McpTransport};
