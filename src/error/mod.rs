use thiserror::Error;

use crate::analysis::SessionStatus;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Iteration out of order for session {session_id}: expected index {expected}, got {actual}")]
    IterationOutOfOrder {
        session_id: String,
        expected: u32,
        actual: u32,
    },

    #[error("Session {session_id} is {status} and can no longer be modified")]
    SessionTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Invalid status transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Cancellation requested for session {session_id}")]
    CancelRequested { session_id: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by external collaborators (generation, evaluation,
/// retrieval, validation, fallback search).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("{operation} failed transiently: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{operation} returned an invalid response: {message}")]
    InvalidResponse { operation: String, message: String },

    #[error("Validation inconclusive: {message}")]
    ValidationInconclusive { message: String },

    #[error("Retrieval returned no content for '{query}'")]
    RetrievalEmpty { query: String },

    #[error("{operation} unavailable after {retries} retries: {message}")]
    Unavailable {
        operation: String,
        message: String,
        retries: u32,
    },
}

impl CollaboratorError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout { .. } | CollaboratorError::Transient { .. }
        )
    }

    /// Classify a Langbase transport error for the given operation.
    pub fn from_langbase(operation: &str, err: LangbaseError) -> Self {
        let operation = operation.to_string();
        match err {
            LangbaseError::Timeout { timeout_ms } => CollaboratorError::Timeout {
                operation,
                timeout_ms,
            },
            LangbaseError::Api { status, message } if status == 429 || status >= 500 => {
                CollaboratorError::Transient {
                    operation,
                    message: format!("{} - {}", status, message),
                }
            }
            LangbaseError::Api { status, message } => CollaboratorError::Failed {
                operation,
                message: format!("{} - {}", status, message),
            },
            LangbaseError::InvalidResponse { message } => {
                CollaboratorError::InvalidResponse { operation, message }
            }
            LangbaseError::Unavailable { message, retries } => CollaboratorError::Unavailable {
                operation,
                message,
                retries,
            },
            LangbaseError::Http(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                CollaboratorError::Transient {
                    operation,
                    message: e.to_string(),
                }
            }
            LangbaseError::Http(e) => CollaboratorError::Failed {
                operation,
                message: e.to_string(),
            },
        }
    }
}

/// Control-surface and state machine errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Analysis session {session_id} is still {status}")]
    NotTerminal {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Analysis session {session_id} is {status} and cannot be deleted")]
    SessionActive {
        session_id: String,
        status: SessionStatus,
    },

    #[error("Cannot delete active sessions, cancel them first: {}", session_ids.join(", "))]
    SessionsActive { session_ids: Vec<String> },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for collaborator calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::IterationOutOfOrder {
            session_id: "sess-1".to_string(),
            expected: 2,
            actual: 4,
        };
        assert_eq!(
            err.to_string(),
            "Iteration out of order for session sess-1: expected index 2, got 4"
        );

        let err = StorageError::SessionTerminal {
            session_id: "sess-1".to_string(),
            status: SessionStatus::Cancelled,
        };
        assert_eq!(
            err.to_string(),
            "Session sess-1 is cancelled and can no longer be modified"
        );
    }

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::Timeout {
            operation: "evaluate".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "evaluate timed out after 5000ms");

        let err = CollaboratorError::RetrievalEmpty {
            query: "revenue growth".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Retrieval returned no content for 'revenue growth'"
        );

        let err = CollaboratorError::Unavailable {
            operation: "fallback_search".to_string(),
            message: "connection refused".to_string(),
            retries: 2,
        };
        assert_eq!(
            err.to_string(),
            "fallback_search unavailable after 2 retries: connection refused"
        );
    }

    #[test]
    fn test_collaborator_error_retryable() {
        assert!(CollaboratorError::Timeout {
            operation: "generate".to_string(),
            timeout_ms: 10,
        }
        .is_retryable());
        assert!(CollaboratorError::Transient {
            operation: "retrieve".to_string(),
            message: "503".to_string(),
        }
        .is_retryable());
        assert!(!CollaboratorError::Failed {
            operation: "generate".to_string(),
            message: "401 - unauthorized".to_string(),
        }
        .is_retryable());
        assert!(!CollaboratorError::ValidationInconclusive {
            message: "no verdict".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_collaborator_error_from_langbase() {
        let err = CollaboratorError::from_langbase("evaluate", LangbaseError::Timeout { timeout_ms: 30 });
        assert!(matches!(err, CollaboratorError::Timeout { timeout_ms: 30, .. }));

        let err = CollaboratorError::from_langbase(
            "evaluate",
            LangbaseError::Api {
                status: 503,
                message: "overloaded".to_string(),
            },
        );
        assert!(err.is_retryable());

        let err = CollaboratorError::from_langbase(
            "evaluate",
            LangbaseError::Api {
                status: 429,
                message: "slow down".to_string(),
            },
        );
        assert!(err.is_retryable());

        let err = CollaboratorError::from_langbase(
            "evaluate",
            LangbaseError::Api {
                status: 401,
                message: "unauthorized".to_string(),
            },
        );
        assert!(matches!(err, CollaboratorError::Failed { .. }));
        assert_eq!(err.to_string(), "evaluate failed: 401 - unauthorized");
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::NotTerminal {
            session_id: "abc".to_string(),
            status: SessionStatus::Running,
        };
        assert_eq!(err.to_string(), "Analysis session abc is still running");

        let err = AnalysisError::InvalidTransition {
            from: SessionStatus::Completed,
            to: SessionStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> running"
        );

        let err = AnalysisError::InvalidQuery {
            reason: "too short".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid query: too short");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownTool {
            tool_name: "nonexistent".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown tool: nonexistent");

        let err = McpError::InvalidParameters {
            tool_name: "analysis_create".to_string(),
            message: "missing query".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameters for analysis_create: missing query"
        );
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Analysis(AnalysisError::SessionNotFound {
            session_id: "missing".to_string(),
        });
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("missing"));
    }

    #[test]
    fn test_layer_conversions_to_app_error() {
        let app_err: AppError = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));

        let app_err: AppError = LangbaseError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Langbase(_)));

        let app_err: AppError = CollaboratorError::RetrievalEmpty {
            query: "q".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Collaborator(_)));

        let app_err: AppError = AnalysisError::SessionNotFound {
            session_id: "s".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Analysis(_)));
    }
}
