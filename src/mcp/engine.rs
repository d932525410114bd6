//! MCP JSON-RPC protocol engine.
//!
//! One engine instance exists per session. The engine owns that session's
//! capability registry (tools and resources) and dispatches JSON-RPC
//! messages delivered by the session's transport, in order.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::ServerError;
use crate::mcp::transport::McpTransport;
use crate::version::VERSION;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Server name reported during the initialize handshake.
pub const SERVER_NAME: &str = "rootspace";

/// JSON-RPC 2.0 Request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Whether this response carries a result rather than an error.
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    arguments: Option<Value>,
}

/// A registered tool: name, description, and structured input schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A registered resource template.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceTemplateDef {
    pub name: &'static str,
    #[serde(rename = "uriTemplate")]
    pub uri_template: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

/// Per-session MCP protocol engine.
///
/// Capability definitions are registered anew for every session; sessions
/// share no mutable protocol state.
pub struct McpEngine {
    tools: Vec<ToolDef>,
    resource_templates: Vec<ResourceTemplateDef>,
}

impl McpEngine {
    /// Create an engine with the full rootspace capability set registered.
    pub fn new() -> Self {
        Self {
            tools: register_tools(),
            resource_templates: register_resources(),
        }
    }

    /// Connect this engine to a transport and process its messages until
    /// the transport reports closure.
    ///
    /// Messages are handled strictly in the order the transport delivers
    /// them. Consumes the engine; the caller runs this on a detached task
    /// whose failure is observable only via logging.
    pub async fn connect(self, transport: Arc<McpTransport>) -> Result<(), ServerError> {
        let mut inbound = transport
            .take_inbound()
            .ok_or(ServerError::TransportAlreadyConnected)?;
        let closed = transport.closed_token();

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some((request, reply)) => {
                        let response = self.handle_request(request).await;
                        // Receiver gone means the HTTP exchange was dropped;
                        // nothing left to deliver.
                        let _ = reply.send(response);
                    }
                    None => break,
                },
            }
        }

        debug!("MCP engine disconnected");
        Ok(())
    }

    /// Handle a single MCP JSON-RPC request. Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        debug!("MCP: Handling method: {}", request.method);

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id)),
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            "tools/list" => Some(JsonRpcResponse::success(
                id,
                json!({ "tools": self.tools }),
            )),
            "tools/call" => Some(self.handle_call_tool(id, request.params.unwrap_or(json!({})))),
            "resources/list" => Some(JsonRpcResponse::success(id, json!({ "resources": [] }))),
            "resources/templates/list" => Some(JsonRpcResponse::success(
                id,
                json!({ "resourceTemplates": self.resource_templates }),
            )),
            "resources/read" => Some(Self::handle_read_resource(id, request.params)),
            "notifications/initialized" | "notifications/cancelled" => {
                // Notifications, no response needed
                None
            }
            _ => Some(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    /// Handle the initialize request.
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": VERSION
                }
            }),
        )
    }

    /// Handle a tools/call request.
    ///
    /// All registered tools are schema-only skeletons; invoking one yields
    /// a not-implemented tool result rather than a protocol error.
    fn handle_call_tool(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let tool_params: ToolCallParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
            }
        };

        if !self.tools.iter().any(|t| t.name == tool_params.name) {
            error!("MCP: Unknown tool: {}", tool_params.name);
            return JsonRpcResponse::error(
                id,
                -32602,
                format!("Unknown tool: {}", tool_params.name),
            );
        }

        JsonRpcResponse::success(
            id,
            json!({
                "content": [{ "type": "text", "text": "Not implemented" }],
                "isError": true
            }),
        )
    }

    /// Handle a resources/read request against the `list://` template.
    fn handle_read_resource(id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let uri = params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(|u| u.as_str())
            .unwrap_or("list://");

        JsonRpcResponse::success(
            id,
            json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "application/json",
                    "text": json!({ "error": "Not implemented" }).to_string()
                }]
            }),
        )
    }
}

impl Default for McpEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The `file.*` and `text.*` tool definitions, schemas only.
fn register_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "file.create",
            description: "Create a new file with the given content",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to create" },
                    "content": { "type": "string", "description": "Content to write to the file" },
                    "encoding": {
                        "type": "string",
                        "enum": ["utf-8", "base64"],
                        "default": "utf-8",
                        "description": "Content encoding"
                    }
                },
                "required": ["path", "content"]
            }),
        },
        ToolDef {
            name: "file.remove",
            description: "Remove an existing file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to remove" },
                    "hash": {
                        "type": "string",
                        "description": "SHA-256 hash of the file content for verification"
                    }
                },
                "required": ["path", "hash"]
            }),
        },
        ToolDef {
            name: "text.read",
            description: "Read text content from a file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to read" },
                    "lines": {
                        "type": "array",
                        "items": { "type": "number" },
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Line range as [start, end), 1-indexed, end exclusive"
                    }
                },
                "required": ["path"]
            }),
        },
        ToolDef {
            name: "text.replace",
            description: "Replace text content in a file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file" },
                    "hash": {
                        "type": "string",
                        "description": "SHA-256 hash of current content for verification"
                    },
                    "lines": {
                        "type": "array",
                        "items": { "type": "number" },
                        "minItems": 2,
                        "maxItems": 2,
                        "description": "Line range as [start, end), 1-indexed, end exclusive"
                    },
                    "old": {
                        "type": "string",
                        "description": "Full content of consecutive lines to replace"
                    },
                    "new": { "type": "string", "description": "New content to replace with" }
                },
                "required": ["path", "hash", "lines", "old", "new"]
            }),
        },
        ToolDef {
            name: "text.insert",
            description: "Insert text content before an anchor line",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file" },
                    "hash": {
                        "type": "string",
                        "description": "SHA-256 hash of current content for verification"
                    },
                    "line": { "type": "number", "description": "Line number to insert at" },
                    "anchor": {
                        "type": "string",
                        "description": "Full content of the anchor line"
                    },
                    "content": { "type": "string", "description": "Content to insert as new lines" }
                },
                "required": ["path", "hash", "line", "anchor", "content"]
            }),
        },
        ToolDef {
            name: "text.append",
            description: "Append text content to the end of a file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file" },
                    "hash": {
                        "type": "string",
                        "description": "SHA-256 hash of current content for verification"
                    },
                    "content": { "type": "string", "description": "Content to append" }
                },
                "required": ["path", "hash", "content"]
            }),
        },
    ]
}

/// The `list://` resource template.
fn register_resources() -> Vec<ResourceTemplateDef> {
    vec![ResourceTemplateDef {
        name: "list",
        uri_template: "list://{path}",
        description: "List immediate children of a directory (non-recursive)",
        mime_type: "application/json",
    }]
}
