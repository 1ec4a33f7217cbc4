//! MCP tool service
//!
//! Handles the message semantics of a session: initialize, ping, tool
//! listing and tool calls. Responses are personalized from the caller's
//! verified identity, never from request parameters.

use serde_json::{Value, json};
use tracing::debug;

use crate::oauth::verifier::AuthContext;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// MCP protocol revision implemented by the gateway
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Stateless dispatcher for session messages
#[derive(Debug, Clone, Default)]
pub struct ToolService;

impl ToolService {
    /// Create the tool service
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Dispatch one request and produce its response.
    ///
    /// Unknown methods get a method-not-found error; a request never goes
    /// unanswered.
    #[must_use]
    pub fn dispatch(&self, request: &JsonRpcRequest, auth: &AuthContext) -> JsonRpcResponse {
        debug!(method = %request.method, user_id = %auth.identity.user_id, "Dispatching request");
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(request.id.clone(), initialize_result()),
            "ping" => JsonRpcResponse::success(request.id.clone(), json!({})),
            "tools/list" => {
                JsonRpcResponse::success(request.id.clone(), json!({"tools": tool_definitions()}))
            }
            "tools/call" => self.call_tool(request, auth),
            other => JsonRpcResponse::error(
                Some(request.id.clone()),
                -32601,
                format!("Method not found: {other}"),
            ),
        }
    }

    fn call_tool(&self, request: &JsonRpcRequest, auth: &AuthContext) -> JsonRpcResponse {
        let params = request.params.as_ref().cloned().unwrap_or(Value::Null);
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match name {
            "echo" => {
                let Some(message) = arguments.get("message").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(
                        Some(request.id.clone()),
                        -32602,
                        "Invalid params: 'message' is required",
                    );
                };
                let user_name = auth
                    .identity
                    .user_name
                    .as_deref()
                    .unwrap_or(&auth.identity.user_id);
                JsonRpcResponse::success(
                    request.id.clone(),
                    json!({
                        "content": [{
                            "type": "text",
                            "text": format!("Hello {user_name}: {message}")
                        }]
                    }),
                )
            }
            other => JsonRpcResponse::error(
                Some(request.id.clone()),
                -32602,
                format!("Unknown tool: {other}"),
            ),
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "echo",
            "description": "Echoes back the provided message, addressed to the caller",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Message to echo"
                    }
                },
                "required": ["message"]
            }
        }
    ])
}
