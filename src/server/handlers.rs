use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::analysis::{SessionCounts, SessionStatus, SourceCategory};
use crate::error::{McpError, McpResult};

/// Default page size for `analysis_list`.
const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "analysis_create" => handle_create(state, arguments).await,
        "analysis_status" => handle_status(state, arguments).await,
        "analysis_iterations" => handle_iterations(state, arguments).await,
        "analysis_cancel" => handle_cancel(state, arguments).await,
        "analysis_export" => handle_export(state, arguments).await,
        "analysis_list" => handle_list(state, arguments).await,
        "analysis_delete" => handle_delete(state, arguments).await,
        "analysis_bulk_delete" => handle_bulk_delete(state, arguments).await,
        "analysis_service_status" => handle_service_status(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Arguments for `analysis_create`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateParams {
    pub query: String,
    #[serde(default, alias = "scope_filter")]
    pub scope: Option<String>,
}

/// Immediate reply to `analysis_create`; the run continues in the background.
#[derive(Debug, Serialize)]
pub struct CreateResult {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DeleteResult {
    session_id: String,
    deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BulkDeleteParams {
    session_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyParams {}

/// Reply to `analysis_service_status`.
#[derive(Debug, Serialize)]
struct ServiceStatus {
    available: bool,
    version: &'static str,
    sessions: SessionCounts,
    max_concurrent_sessions: usize,
    max_iterations: u32,
    quality_threshold: f64,
    trusted_sources: Vec<SourceCategory>,
}

/// Handle analysis_create: validate, persist and schedule.
async fn handle_create(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analysis_create", arguments, |params: CreateParams| async move {
        let started = state
            .engine
            .start(&params.query, params.scope.as_deref())
            .await?;
        Ok::<_, crate::error::AppError>(CreateResult {
            session_id: started.session.id,
            status: started.session.status,
        })
    })
    .await
}

async fn handle_status(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analysis_status", arguments, |params: SessionParams| async move {
        state.tracker().get_status(&params.session_id).await
    })
    .await
}

async fn handle_iterations(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "analysis_iterations",
        arguments,
        |params: SessionParams| async move {
            state.tracker().get_iterations(&params.session_id).await
        },
    )
    .await
}

async fn handle_cancel(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analysis_cancel", arguments, |params: SessionParams| async move {
        state.tracker().request_cancel(&params.session_id).await
    })
    .await
}

async fn handle_export(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analysis_export", arguments, |params: SessionParams| async move {
        state.tracker().export_result(&params.session_id).await
    })
    .await
}

/// Handle analysis_list. Arguments are optional.
async fn handle_list(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let arguments = arguments.or_else(|| Some(Value::Object(Default::default())));
    execute_handler("analysis_list", arguments, |params: ListParams| async move {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        state.tracker().list_sessions(limit).await
    })
    .await
}

async fn handle_delete(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("analysis_delete", arguments, |params: SessionParams| async move {
        state.tracker().delete_session(&params.session_id).await?;
        Ok::<_, crate::error::AppError>(DeleteResult {
            session_id: params.session_id,
            deleted: true,
        })
    })
    .await
}

async fn handle_bulk_delete(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let tool_name = "analysis_bulk_delete";
    let params: BulkDeleteParams = parse_arguments(tool_name, arguments)?;
    if params.session_ids.is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "No session ids provided".to_string(),
        });
    }

    let outcome = state
        .tracker()
        .delete_sessions(&params.session_ids)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;
    serde_json::to_value(outcome).map_err(McpError::Json)
}

/// Handle analysis_service_status. Arguments are optional.
async fn handle_service_status(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let arguments = arguments.or_else(|| Some(Value::Object(Default::default())));
    execute_handler(
        "analysis_service_status",
        arguments,
        |_: EmptyParams| async move {
            let sessions = state.tracker().session_counts().await?;
            let analysis = &state.config.analysis;
            Ok::<_, crate::error::AppError>(ServiceStatus {
                available: true,
                version: env!("CARGO_PKG_VERSION"),
                sessions,
                max_concurrent_sessions: analysis.max_concurrent_sessions,
                max_iterations: analysis.max_iterations,
                quality_threshold: analysis.quality_threshold,
                trusted_sources: analysis.trusted_sources.clone(),
            })
        },
    )
    .await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse typed arguments, run the operation and serialize its result.
///
/// # Type Parameters
/// - `P`: Parameter type (must implement DeserializeOwned)
/// - `R`: Result type (must implement Serialize)
/// - `E`: Error type (must implement Display)
/// - `F`: Async operation that takes P and returns Result<R, E>
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}
