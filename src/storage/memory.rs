use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Invocation, SessionStore};
use crate::analysis::{
    AnalysisSession, Draft, IterationRecord, SessionCounts, SessionStatus, SessionSummary,
    TerminationReason,
};
use crate::error::{StorageError, StorageResult};

/// In-process session store.
///
/// Used by the test suite and by one-shot CLI runs that do not need
/// durability. Every operation holds the lock for its whole duration, so
/// readers never observe a partially applied write.
#[derive(Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<String, AnalysisSession>>,
    invocations: RwLock<Vec<Invocation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every logged collaborator call, oldest first.
    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.read().await.clone()
    }
}

fn not_found(id: &str) -> StorageError {
    StorageError::SessionNotFound {
        session_id: id.to_string(),
    }
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn create_session(&self, session: &AnalysisSession) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StorageError::Query {
                message: format!("Session already exists: {}", session.id),
            });
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<AnalysisSession>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list_sessions(&self, limit: u32) -> StorageResult<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                query: s.query.clone(),
                scope_filter: s.scope_filter.clone(),
                status: s.status,
                termination_reason: s.termination_reason,
                iteration_count: u32::try_from(s.iterations.len()).unwrap_or(u32::MAX),
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit as usize);
        Ok(summaries)
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if !session.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                session_id: id.to_string(),
                from: session.status,
                to: status,
            });
        }
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn save_draft(&self, id: &str, draft: &Draft) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if session.status.is_terminal() {
            return Err(StorageError::SessionTerminal {
                session_id: id.to_string(),
                status: session.status,
            });
        }
        session.current_draft = Some(draft.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_session(
        &self,
        id: &str,
        reason: TerminationReason,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        let status = reason.terminal_status();
        if !session.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                session_id: id.to_string(),
                from: session.status,
                to: status,
            });
        }
        let now = Utc::now();
        session.status = status;
        session.termination_reason = Some(reason);
        if let Some(message) = error_message {
            session.error_message = Some(message.to_string());
        }
        session.completed_at = Some(now);
        session.updated_at = now;
        Ok(())
    }

    async fn request_cancel(&self, id: &str) -> StorageResult<SessionStatus> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
        if !session.status.is_terminal() {
            session.cancel_requested = true;
            session.updated_at = Utc::now();
        }
        Ok(session.status)
    }

    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.cancel_requested)
            .ok_or_else(|| not_found(id))
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        self.sessions
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }

    async fn fail_running_sessions(&self, error_message: &str) -> StorageResult<Vec<String>> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let mut failed = Vec::new();
        for session in sessions
            .values_mut()
            .filter(|s| s.status == SessionStatus::Running)
        {
            session.status = SessionStatus::Failed;
            session.termination_reason = Some(TerminationReason::Error);
            session.error_message = Some(error_message.to_string());
            session.completed_at = Some(now);
            session.updated_at = now;
            failed.push(session.id.clone());
        }
        Ok(failed)
    }

    async fn pending_session_ids(&self) -> StorageResult<Vec<String>> {
        let sessions = self.sessions.read().await;
        let mut pending: Vec<&AnalysisSession> = sessions
            .values()
            .filter(|s| s.status == SessionStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending.into_iter().map(|s| s.id.clone()).collect())
    }

    async fn session_counts(&self) -> StorageResult<SessionCounts> {
        let mut counts = SessionCounts::default();
        for session in self.sessions.read().await.values() {
            counts.add(session.status, 1);
        }
        Ok(counts)
    }

    async fn get_iterations(&self, session_id: &str) -> StorageResult<Vec<IterationRecord>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.iterations.clone())
            .unwrap_or_default())
    }

    async fn append_iteration(
        &self,
        session_id: &str,
        record: &IterationRecord,
    ) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| not_found(session_id))?;

        if session.status != SessionStatus::Running {
            return Err(StorageError::SessionTerminal {
                session_id: session_id.to_string(),
                status: session.status,
            });
        }
        if session.cancel_requested {
            return Err(StorageError::CancelRequested {
                session_id: session_id.to_string(),
            });
        }
        let expected = u32::try_from(session.iterations.len()).unwrap_or(u32::MAX);
        if record.index != expected {
            return Err(StorageError::IterationOutOfOrder {
                session_id: session_id.to_string(),
                expected,
                actual: record.index,
            });
        }

        session.iterations.push(record.clone());
        session.current_draft = Some(record.post_draft.clone());
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        self.invocations.write().await.push(invocation.clone());
        Ok(())
    }
}
