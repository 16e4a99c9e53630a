//! Integration tests for MCP protocol handling
//!
//! Feeds JSON-RPC lines to the server the way a stdio client would, with
//! scripted collaborators and an in-memory SQLite store.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mcp_iterative_analysis::collaborators::fakes::offline_collaborators;
use mcp_iterative_analysis::config::{
    AnalysisConfig, Config, DatabaseConfig, LangbaseConfig, LogFormat, LoggingConfig, PipeConfig,
    RequestConfig,
};
use mcp_iterative_analysis::server::{list_tools, AppState, McpServer};
use mcp_iterative_analysis::storage::SqliteStorage;

fn test_config() -> Config {
    Config {
        langbase: LangbaseConfig {
            api_key: String::new(),
            base_url: "http://localhost:0".to_string(),
        },
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig {
            timeout_ms: 2_000,
            max_retries: 0,
            retry_delay_ms: 0,
        },
        pipes: PipeConfig::default(),
        analysis: AnalysisConfig::default(),
    }
}

async fn create_server() -> McpServer {
    let store = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
    let state = AppState::new(test_config(), store, offline_collaborators());
    McpServer::new(Arc::new(state))
}

/// Send one line and parse the reply.
async fn send(server: &McpServer, line: Value) -> Value {
    let response = server
        .handle_message(&line.to_string())
        .await
        .expect("expected a response");
    serde_json::to_value(response).unwrap()
}

/// Verify JSON-RPC 2.0 response structure
fn assert_valid_jsonrpc_response(response: &Value) {
    assert_eq!(response["jsonrpc"], "2.0", "Invalid JSON-RPC version");
    assert!(
        response.get("result").is_some() != response.get("error").is_some(),
        "Response must have exactly one of result or error"
    );
}

fn tool_body(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_then_initialized() {
        let server = create_server().await;

        let response = send(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "1.0.0"}
                }
            }),
        )
        .await;

        assert_valid_jsonrpc_response(&response);
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["serverInfo"]["name"], "mcp-iterative-analysis");

        let ack = json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string();
        assert!(server.handle_message(&ack).await.is_none());
    }

    #[tokio::test]
    async fn test_ping() {
        let server = create_server().await;
        let response = send(&server, json!({"jsonrpc": "2.0", "id": "p", "method": "ping"})).await;

        assert_valid_jsonrpc_response(&response);
        assert_eq!(response["id"], "p");
        assert_eq!(response["result"], json!({}));
    }
}

#[cfg(test)]
mod tools_list_tests {
    use super::*;

    #[tokio::test]
    async fn test_tools_list_matches_definitions() {
        let server = create_server().await;
        let response = send(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;

        let listed: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        let defined: Vec<String> = list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(listed, defined);

        for tool in response["result"]["tools"].as_array().unwrap() {
            assert!(tool["inputSchema"].is_object());
            assert!(tool["description"].as_str().unwrap().len() > 20);
        }
    }
}

#[cfg(test)]
mod session_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_poll_export() {
        let server = create_server().await;

        let created = send(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 10,
                "method": "tools/call",
                "params": {
                    "name": "analysis_create",
                    "arguments": {"query": "Is ACME Corp a good long-term investment?", "scope": "ACME"}
                }
            }),
        )
        .await;
        assert_valid_jsonrpc_response(&created);
        assert!(created["result"]["isError"].is_null());
        let session_id = tool_body(&created)["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let response = send(
                    &server,
                    json!({
                        "jsonrpc": "2.0",
                        "id": 11,
                        "method": "tools/call",
                        "params": {"name": "analysis_status", "arguments": {"session_id": session_id}}
                    }),
                )
                .await;
                let body = tool_body(&response);
                if body["status"] == "completed" {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("analysis did not complete");

        // Offline scores climb 5, 6, 7 and stop at the default threshold.
        assert_eq!(status["termination_reason"], "quality_met");
        assert_eq!(status["latest_score"], 7.0);

        let export = send(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 12,
                "method": "tools/call",
                "params": {"name": "analysis_export", "arguments": {"session_id": session_id}}
            }),
        )
        .await;
        let body = tool_body(&export);
        assert_eq!(body["scope_filter"], "ACME");
        assert_eq!(body["stats"]["score_trajectory"], json!([5.0, 6.0, 7.0]));
        assert_eq!(body["iterations"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_export_of_unknown_session_is_tool_error() {
        let server = create_server().await;

        let response = send(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 13,
                "method": "tools/call",
                "params": {"name": "analysis_export", "arguments": {"session_id": "nope"}}
            }),
        )
        .await;

        assert_valid_jsonrpc_response(&response);
        assert_eq!(response["result"]["isError"], true);
        assert!(tool_body(&response).as_str().unwrap().contains("not found"));
    }
}

#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let server = create_server().await;
        let response = serde_json::to_value(server.handle_message("{\"jsonrpc\":").await.unwrap())
            .unwrap();

        assert_valid_jsonrpc_response(&response);
        assert_eq!(response["error"]["code"], -32700);
        assert!(response["id"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_tool_call_params() {
        let server = create_server().await;
        let response = send(
            &server,
            json!({"jsonrpc": "2.0", "id": 20, "method": "tools/call", "params": {"arguments": {}}}),
        )
        .await;

        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["id"], 20);
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let server = create_server().await;
        let response = send(&server, json!({"jsonrpc": "2.0", "id": 21, "method": "prompts/list"})).await;

        assert_eq!(response["error"]["code"], -32601);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("prompts/list"));
    }

    #[tokio::test]
    async fn test_unknown_notification_is_ignored() {
        let server = create_server().await;
        let line = json!({"jsonrpc": "2.0", "method": "notifications/progress"}).to_string();
        assert!(server.handle_message(&line).await.is_none());
    }
}
