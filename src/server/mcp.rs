//! JSON-RPC 2.0 over stdio, plus the tool catalogue for the analysis
//! control surface.
//!
//! One message per line on stdin, one response per line on stdout.
//! Notifications get no response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// Incoming JSON-RPC message.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol tag, "2.0".
    pub jsonrpc: String,
    /// Absent on notifications.
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC message. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol tag, "2.0".
    pub jsonrpc: String,
    /// Echoed request id; null when the request could not be parsed.
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Error member of a [`JsonRpcResponse`].
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// -32700 parse, -32601 unknown method, -32602 bad params, -32603 internal.
    pub code: i32,
    /// Message shown to the client.
    pub message: String,
    /// Extra detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Name and version reported on `initialize`.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Crate version.
    pub version: String,
}

/// Capability set advertised on `initialize`.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tools capability.
    pub tools: ToolCapabilities,
}

/// The tool list is fixed, so `listChanged` is always false.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Tool list change notifications.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Reply to `initialize`.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// Negotiated MCP revision.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// Server identity.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Entry in the `tools/list` reply.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Name used in `tools/call`.
    pub name: String,
    /// What the tool does, for the client model.
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/call` parameters.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// Tool to run.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// One content block of a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// Always "text" here.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Pretty-printed JSON, or the error message.
    pub text: String,
}

/// `tools/call` reply body.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// Content blocks.
    pub content: Vec<ToolResultContent>,
    /// Set when the tool itself failed.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Reads one JSON-RPC message per line from stdin and writes responses to
/// stdout. Logging goes to stderr.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP iterative analysis server starting");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            if let Some(response) = self.handle_message(&line).await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one raw line. Returns `None` for blank lines and notifications.
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        debug!(request = %trimmed, "Received request");

        match serde_json::from_str::<JsonRpcRequest>(trimmed) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request.
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "mcp-iterative-analysis".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");
        JsonRpcResponse::success(id, json!({ "tools": list_tools() }))
    }

    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool the server exposes.
pub fn list_tools() -> Vec<Tool> {
    vec![
        get_create_tool(),
        get_status_tool(),
        get_iterations_tool(),
        get_cancel_tool(),
        get_export_tool(),
        get_list_tool(),
        get_delete_tool(),
        get_bulk_delete_tool(),
        get_service_status_tool(),
    ]
}

fn session_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "session_id": {
                "type": "string",
                "description": "Analysis session ID"
            }
        },
        "required": ["session_id"],
        "additionalProperties": false
    })
}

fn get_create_tool() -> Tool {
    Tool {
        name: "analysis_create".to_string(),
        description: "Start an iterative investment analysis. Drafts an answer, then repeatedly critiques it, retrieves evidence for its gaps, and refines it until the quality threshold or the iteration cap is reached. Returns immediately with the session ID; poll analysis_status for progress.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The investment question to analyze",
                    "minLength": 10,
                    "maxLength": 1000
                },
                "scope": {
                    "type": "string",
                    "description": "Optional subject filter, e.g. a company name or ticker"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn get_status_tool() -> Tool {
    Tool {
        name: "analysis_status".to_string(),
        description: "Get the status of an analysis: lifecycle state, iteration index, latest completeness score, current stage, and progress counters.".to_string(),
        input_schema: session_id_schema(),
    }
}

fn get_iterations_tool() -> Tool {
    Tool {
        name: "analysis_iterations".to_string(),
        description: "Get the committed iteration history of an analysis: drafts, scores, gaps, queries, and evidence per iteration.".to_string(),
        input_schema: session_id_schema(),
    }
}

fn get_cancel_tool() -> Tool {
    Tool {
        name: "analysis_cancel".to_string(),
        description: "Request cancellation of a running analysis. The analysis stops at its next stage boundary; committed iterations are kept.".to_string(),
        input_schema: session_id_schema(),
    }
}

fn get_export_tool() -> Tool {
    Tool {
        name: "analysis_export".to_string(),
        description: "Export a finished analysis: final draft, recommendation, termination reason, statistics, and the full iteration history.".to_string(),
        input_schema: session_id_schema(),
    }
}

fn get_list_tool() -> Tool {
    Tool {
        name: "analysis_list".to_string(),
        description: "List recent analyses, newest first.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of sessions to return",
                    "minimum": 1,
                    "maximum": 100,
                    "default": 20
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_delete_tool() -> Tool {
    Tool {
        name: "analysis_delete".to_string(),
        description: "Delete a finished analysis and its history. Running analyses must be cancelled first.".to_string(),
        input_schema: session_id_schema(),
    }
}

fn get_bulk_delete_tool() -> Tool {
    Tool {
        name: "analysis_bulk_delete".to_string(),
        description: "Delete several finished analyses at once. Nothing is deleted if any of them is still pending or running; unknown IDs are reported back.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "session_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Analysis session IDs to delete"
                }
            },
            "required": ["session_ids"],
            "additionalProperties": false
        }),
    }
}

fn get_service_status_tool() -> Tool {
    Tool {
        name: "analysis_service_status".to_string(),
        description: "Report whether the analysis service is available, with session counts per status and the active analysis limits.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}
