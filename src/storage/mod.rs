//! Storage layer for analysis session persistence.
//!
//! This module provides the [`SessionStore`] trait with a SQLite-backed
//! implementation for durable sessions and an in-memory implementation for
//! tests and one-shot batch runs.

mod memory;
mod sqlite;


pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{
    AnalysisSession, Draft, IterationRecord, SessionCounts, SessionStatus, SessionSummary,
    TerminationReason,
};
use crate::error::StorageResult;

/// Collaborator call log entry for debugging and auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// Session the call was made for.
    pub session_id: Option<String>,
    /// Collaborator operation (e.g. "evaluate", "fallback_search").
    pub operation: String,
    /// Input summary as JSON.
    pub input: serde_json::Value,
    /// Output as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Attempts made, including retries.
    pub attempts: u32,
    /// Total latency across attempts in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the call eventually succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the call started.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(operation: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: None,
            operation: operation.into(),
            input,
            output: None,
            attempts: 0,
            latency_ms: None,
            success: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Attach the owning session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Mark as successful
    pub fn success(mut self, output: serde_json::Value, attempts: u32, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.attempts = attempts;
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed
    pub fn failure(mut self, error: impl Into<String>, attempts: u32, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.attempts = attempts;
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Persistence for analysis sessions and their iteration history.
///
/// Only the orchestrator running a session calls the mutating methods for
/// it; reads may come from any number of callers and always observe whole
/// iterations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    // ========================================================================
    // Session operations
    // ========================================================================

    /// Insert a new session.
    async fn create_session(&self, session: &AnalysisSession) -> StorageResult<()>;

    /// Load a session together with its ordered iteration history.
    async fn get_session(&self, id: &str) -> StorageResult<Option<AnalysisSession>>;

    /// List sessions, newest first.
    async fn list_sessions(&self, limit: u32) -> StorageResult<Vec<SessionSummary>>;

    /// Move a session to a new non-terminal-to-next status.
    ///
    /// Fails with `InvalidTransition` when the lifecycle forbids the move.
    async fn update_status(&self, id: &str, status: SessionStatus) -> StorageResult<()>;

    /// Replace the session's current draft.
    async fn save_draft(&self, id: &str, draft: &Draft) -> StorageResult<()>;

    /// Move a session to the terminal status implied by `reason`.
    async fn finish_session(
        &self,
        id: &str,
        reason: TerminationReason,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Flag a session for cancellation and return its status.
    ///
    /// Terminal sessions are left untouched.
    async fn request_cancel(&self, id: &str) -> StorageResult<SessionStatus>;

    /// Whether cancellation has been requested for a session.
    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool>;

    /// Delete a session and its iterations.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;

    /// Fail every `running` session with reason `error` and return their ids.
    ///
    /// Called at startup: no task of this process owns those sessions.
    /// Committed iterations are kept.
    async fn fail_running_sessions(&self, error_message: &str) -> StorageResult<Vec<String>>;

    /// Ids of `pending` sessions, oldest first.
    async fn pending_session_ids(&self) -> StorageResult<Vec<String>>;

    /// Count sessions per status.
    async fn session_counts(&self) -> StorageResult<SessionCounts>;

    // ========================================================================
    // Iteration operations
    // ========================================================================

    /// Ordered iteration history of a session.
    async fn get_iterations(&self, session_id: &str) -> StorageResult<Vec<IterationRecord>>;

    /// Atomically append an iteration and advance the current draft.
    ///
    /// The record's index must equal the number of stored iterations, the
    /// session must not be terminal, and no cancellation may be pending.
    async fn append_iteration(
        &self,
        session_id: &str,
        record: &IterationRecord,
    ) -> StorageResult<()>;

    // ========================================================================
    // Invocation logging
    // ========================================================================

    /// Record a collaborator call.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;
}
