//! Progress tracking and the caller-facing control surface.
//!
//! The tracker is the only path through which sessions are created, read,
//! cancelled and exported. The orchestrator writes through it as well, so
//! every state change is published to per-session watch channels that
//! observers may subscribe to. Pollers read directly from the store and
//! always see whole iterations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::types::{
    AnalysisSession, Draft, EvidenceSource, IterationPhase, IterationRecord, SessionCounts,
    SessionStatus, SessionSummary, TerminationReason,
};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AppError, AppResult, StorageError, StorageResult};
use crate::storage::SessionStore;

/// Draft section holding the final recommendation.
pub const RECOMMENDATION_SECTION: &str = "recommendation";
/// Draft section holding the stated confidence level.
pub const CONFIDENCE_SECTION: &str = "confidence_level";

/// Point-in-time view of a session's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    /// Number of committed iterations; the index the next iteration will use.
    pub iteration_index: u32,
    pub latest_score: Option<f64>,
    /// Stage of the iteration in flight, while running.
    pub phase: Option<IterationPhase>,
    pub cancel_requested: bool,
    pub termination_reason: Option<TerminationReason>,
    pub error_message: Option<String>,
    pub queries_executed: usize,
    pub evidence_collected: usize,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    fn from_session(session: &AnalysisSession, phase: Option<IterationPhase>) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            iteration_index: u32::try_from(session.iterations.len()).unwrap_or(u32::MAX),
            latest_score: session.latest_score(),
            phase: if session.status == SessionStatus::Running {
                phase
            } else {
                None
            },
            cancel_requested: session.cancel_requested,
            termination_reason: session.termination_reason,
            error_message: session.error_message.clone(),
            queries_executed: session.query_count(),
            evidence_collected: session.evidence_count(),
            updated_at: session.updated_at,
        }
    }
}

/// Answer to a cancellation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    pub session_id: String,
    /// False when the session had already finished.
    pub accepted: bool,
    pub status: SessionStatus,
    pub message: String,
}

/// Error message recorded on sessions a previous process left running.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// Sessions settled at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    /// Sessions that were running and are now failed.
    pub failed: Vec<String>,
    /// Sessions still pending, oldest first, to be scheduled again.
    pub pending: Vec<String>,
}

/// Outcome of deleting several sessions at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkDelete {
    pub deleted: Vec<String>,
    /// Requested ids with no stored session.
    pub not_found: Vec<String>,
}

/// Aggregate figures over a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportStats {
    pub iterations: usize,
    pub queries: usize,
    pub primary_evidence: usize,
    pub fallback_evidence: usize,
    pub low_confidence_evidence: usize,
    pub score_trajectory: Vec<f64>,
}

impl ExportStats {
    fn from_iterations(iterations: &[IterationRecord]) -> Self {
        let evidence = || iterations.iter().flat_map(|r| r.evidence.iter());
        Self {
            iterations: iterations.len(),
            queries: iterations.iter().map(|r| r.queries.len()).sum(),
            primary_evidence: evidence()
                .filter(|e| e.source == EvidenceSource::PrimaryIndex)
                .count(),
            fallback_evidence: evidence()
                .filter(|e| e.source == EvidenceSource::FallbackSearch)
                .count(),
            low_confidence_evidence: evidence().filter(|e| e.low_confidence).count(),
            score_trajectory: iterations.iter().map(|r| r.score).collect(),
        }
    }
}

/// Self-contained artifact for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExport {
    pub session_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_filter: Option<String>,
    pub status: SessionStatus,
    pub termination_reason: TerminationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub final_draft: Option<Draft>,
    pub final_recommendation: Option<String>,
    pub confidence_level: Option<String>,
    pub stats: ExportStats,
    pub iterations: Vec<IterationRecord>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn not_found(session_id: &str) -> AppError {
    AnalysisError::SessionNotFound {
        session_id: session_id.to_string(),
    }
    .into()
}

fn from_storage(session_id: &str, err: StorageError) -> AppError {
    match err {
        StorageError::SessionNotFound { .. } => not_found(session_id),
        other => other.into(),
    }
}

/// Session lifecycle, progress publication, and read access.
pub struct ProgressTracker {
    store: Arc<dyn SessionStore>,
    config: AnalysisConfig,
    channels: RwLock<HashMap<String, watch::Sender<StatusSnapshot>>>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn SessionStore>, config: AnalysisConfig) -> Self {
        Self {
            store,
            config,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Validate the request and create a pending session.
    pub async fn create_session(
        &self,
        query: &str,
        scope_filter: Option<&str>,
    ) -> AppResult<AnalysisSession> {
        let query = query.trim();
        let length = query.chars().count();
        if length < self.config.min_query_length {
            return Err(AnalysisError::InvalidQuery {
                reason: format!(
                    "query must be at least {} characters",
                    self.config.min_query_length
                ),
            }
            .into());
        }
        if length > self.config.max_query_length {
            return Err(AnalysisError::InvalidQuery {
                reason: format!(
                    "query must be at most {} characters",
                    self.config.max_query_length
                ),
            }
            .into());
        }

        let scope = scope_filter
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let session = AnalysisSession::new(query, scope);
        self.store.create_session(&session).await?;

        info!(session_id = %session.id, "Analysis session created");
        self.publish(&session, None).await;
        Ok(session)
    }

    /// Full session with its iteration history.
    pub async fn get_session(&self, session_id: &str) -> AppResult<AnalysisSession> {
        self.store
            .get_session(session_id)
            .await
            .map_err(|e| from_storage(session_id, e))?
            .ok_or_else(|| not_found(session_id))
    }

    /// Current status, iteration index, latest score and counters.
    pub async fn get_status(&self, session_id: &str) -> AppResult<StatusSnapshot> {
        let session = self.get_session(session_id).await?;
        let phase = self.current_phase(session_id).await;
        Ok(StatusSnapshot::from_session(&session, phase))
    }

    /// Ordered, committed iterations.
    pub async fn get_iterations(&self, session_id: &str) -> AppResult<Vec<IterationRecord>> {
        Ok(self.get_session(session_id).await?.iterations)
    }

    /// Newest sessions first.
    pub async fn list_sessions(&self, limit: u32) -> AppResult<Vec<SessionSummary>> {
        Ok(self.store.list_sessions(limit).await?)
    }

    /// Ask a session to stop at its next stage boundary.
    pub async fn request_cancel(&self, session_id: &str) -> AppResult<CancelAck> {
        let status = self
            .store
            .request_cancel(session_id)
            .await
            .map_err(|e| from_storage(session_id, e))?;

        if status.is_terminal() {
            debug!(session_id = %session_id, status = %status, "Cancel ignored for finished session");
            return Ok(CancelAck {
                session_id: session_id.to_string(),
                accepted: false,
                status,
                message: "Analysis is no longer running".to_string(),
            });
        }

        info!(session_id = %session_id, "Cancellation requested");
        self.refresh(session_id).await;
        Ok(CancelAck {
            session_id: session_id.to_string(),
            accepted: true,
            status,
            message: "Cancellation requested; the analysis stops at the next stage boundary"
                .to_string(),
        })
    }

    /// Export a finished session.
    pub async fn export_result(&self, session_id: &str) -> AppResult<AnalysisExport> {
        let session = self.get_session(session_id).await?;
        if !session.status.is_terminal() {
            return Err(AnalysisError::NotTerminal {
                session_id: session_id.to_string(),
                status: session.status,
            }
            .into());
        }

        let termination_reason = session.termination_reason.ok_or_else(|| AppError::Internal {
            message: format!("Session {} is terminal without a reason", session_id),
        })?;

        let section = |name: &str| {
            session
                .current_draft
                .as_ref()
                .and_then(|d| d.section(name))
                .map(|s| s.content.clone())
        };
        let final_recommendation = section(RECOMMENDATION_SECTION);
        let confidence_level = section(CONFIDENCE_SECTION);

        Ok(AnalysisExport {
            stats: ExportStats::from_iterations(&session.iterations),
            session_id: session.id,
            query: session.query,
            scope_filter: session.scope_filter,
            status: session.status,
            termination_reason,
            error_message: session.error_message,
            final_draft: session.current_draft,
            final_recommendation,
            confidence_level,
            iterations: session.iterations,
            created_at: session.created_at,
            completed_at: session.completed_at,
        })
    }

    /// Remove a finished session.
    pub async fn delete_session(&self, session_id: &str) -> AppResult<()> {
        let session = self.get_session(session_id).await?;
        if !session.status.is_terminal() {
            return Err(AnalysisError::SessionActive {
                session_id: session_id.to_string(),
                status: session.status,
            }
            .into());
        }

        self.store
            .delete_session(session_id)
            .await
            .map_err(|e| from_storage(session_id, e))?;
        self.channels.write().await.remove(session_id);
        info!(session_id = %session_id, "Analysis session deleted");
        Ok(())
    }

    /// Remove several finished sessions.
    ///
    /// The batch is refused as a whole when any session is still pending or
    /// running. Unknown ids are reported, not treated as errors.
    pub async fn delete_sessions(&self, session_ids: &[String]) -> AppResult<BulkDelete> {
        let mut outcome = BulkDelete::default();
        let mut active = Vec::new();
        let mut finished = Vec::new();
        let mut seen = HashSet::new();
        for session_id in session_ids.iter().filter(|id| seen.insert(id.as_str())) {
            match self.store.get_session(session_id).await? {
                None => outcome.not_found.push(session_id.clone()),
                Some(session) if !session.status.is_terminal() => active.push(session.id),
                Some(session) => finished.push(session.id),
            }
        }
        if !active.is_empty() {
            return Err(AnalysisError::SessionsActive {
                session_ids: active,
            }
            .into());
        }

        for session_id in finished {
            match self.store.delete_session(&session_id).await {
                Ok(()) => outcome.deleted.push(session_id),
                Err(StorageError::SessionNotFound { .. }) => outcome.not_found.push(session_id),
                Err(e) => return Err(e.into()),
            }
        }
        let mut channels = self.channels.write().await;
        for session_id in &outcome.deleted {
            channels.remove(session_id);
        }
        info!(
            deleted = outcome.deleted.len(),
            not_found = outcome.not_found.len(),
            "Analysis sessions deleted"
        );
        Ok(outcome)
    }

    /// Number of stored sessions in each status.
    pub async fn session_counts(&self) -> AppResult<SessionCounts> {
        Ok(self.store.session_counts().await?)
    }

    /// Watch a session's progress.
    ///
    /// A finished session yields a receiver holding its terminal snapshot
    /// whose sender is already gone.
    pub async fn subscribe(&self, session_id: &str) -> AppResult<watch::Receiver<StatusSnapshot>> {
        if let Some(sender) = self.channels.read().await.get(session_id) {
            return Ok(sender.subscribe());
        }
        let session = self.get_session(session_id).await?;
        if session.status.is_terminal() {
            return Ok(watch::channel(StatusSnapshot::from_session(&session, None)).1);
        }
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(session_id.to_string())
            .or_insert_with(|| watch::channel(StatusSnapshot::from_session(&session, None)).0);
        Ok(sender.subscribe())
    }

    // ========================================================================
    // Orchestrator writes
    // ========================================================================

    /// Settle sessions a previous process left behind.
    ///
    /// Running sessions have no owner any more and are failed with their
    /// committed iterations kept. Pending sessions are returned for
    /// rescheduling.
    pub async fn recover_interrupted(&self) -> AppResult<Recovery> {
        let failed = self.store.fail_running_sessions(INTERRUPTED_MESSAGE).await?;
        for session_id in &failed {
            warn!(session_id = %session_id, "Session interrupted by restart, marked failed");
        }
        let pending = self.store.pending_session_ids().await?;
        if !failed.is_empty() || !pending.is_empty() {
            info!(
                failed = failed.len(),
                pending = pending.len(),
                "Recovered sessions from previous run"
            );
        }
        Ok(Recovery { failed, pending })
    }

    /// Whether cancellation has been requested.
    pub async fn is_cancel_requested(&self, session_id: &str) -> StorageResult<bool> {
        self.store.is_cancel_requested(session_id).await
    }

    pub(crate) async fn mark_running(&self, session_id: &str) -> StorageResult<()> {
        self.store
            .update_status(session_id, SessionStatus::Running)
            .await?;
        self.set_phase(session_id, IterationPhase::Generating).await;
        self.refresh(session_id).await;
        Ok(())
    }

    pub(crate) async fn record_draft(&self, session_id: &str, draft: &Draft) -> StorageResult<()> {
        self.store.save_draft(session_id, draft).await?;
        self.refresh(session_id).await;
        Ok(())
    }

    /// Publish the stage the running iteration has entered.
    pub(crate) async fn set_phase(&self, session_id: &str, phase: IterationPhase) {
        if let Some(sender) = self.channels.read().await.get(session_id) {
            sender.send_modify(|snapshot| {
                snapshot.phase = Some(phase);
                snapshot.updated_at = Utc::now();
            });
        }
    }

    pub(crate) async fn commit_iteration(
        &self,
        session_id: &str,
        record: &IterationRecord,
    ) -> StorageResult<()> {
        self.store.append_iteration(session_id, record).await?;
        self.refresh(session_id).await;
        Ok(())
    }

    pub(crate) async fn finish(
        &self,
        session_id: &str,
        reason: TerminationReason,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        self.store
            .finish_session(session_id, reason, error_message)
            .await?;
        self.refresh(session_id).await;
        // Receivers keep the terminal snapshot after the sender is dropped.
        self.channels.write().await.remove(session_id);
        Ok(())
    }

    // ========================================================================
    // Publication
    // ========================================================================

    async fn current_phase(&self, session_id: &str) -> Option<IterationPhase> {
        self.channels
            .read()
            .await
            .get(session_id)
            .and_then(|sender| sender.borrow().phase)
    }

    /// Reload a session and publish its snapshot, keeping the live phase.
    async fn refresh(&self, session_id: &str) {
        match self.store.get_session(session_id).await {
            Ok(Some(session)) => {
                let phase = self.current_phase(session_id).await;
                self.publish(&session, phase).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to refresh progress snapshot");
            }
        }
    }

    async fn publish(&self, session: &AnalysisSession, phase: Option<IterationPhase>) {
        let snapshot = StatusSnapshot::from_session(session, phase);
        let mut channels = self.channels.write().await;
        match channels.get(&session.id) {
            Some(sender) => {
                sender.send_replace(snapshot);
            }
            None if session.status.is_terminal() => {}
            None => {
                let (sender, _) = watch::channel(snapshot);
                channels.insert(session.id.clone(), sender);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(Arc::new(MemoryStorage::new()), AnalysisConfig::default())
    }

    const QUERY: &str = "Should I invest in ACME Corp this year?";

    #[tokio::test]
    async fn test_create_session_validates_query() {
        let tracker = tracker();

        let err = tracker.create_session("  short  ", None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Analysis(AnalysisError::InvalidQuery { .. })
        ));

        let long = "x".repeat(1001);
        assert!(tracker.create_session(&long, None).await.is_err());

        let session = tracker
            .create_session(&format!("  {}  ", QUERY), Some("   "))
            .await
            .unwrap();
        assert_eq!(session.query, QUERY);
        assert_eq!(session.scope_filter, None);
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_of_new_session() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, Some("ACME")).await.unwrap();

        let status = tracker.get_status(&session.id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Pending);
        assert_eq!(status.iteration_index, 0);
        assert_eq!(status.latest_score, None);
        assert_eq!(status.phase, None);
        assert!(!status.cancel_requested);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let tracker = tracker();
        for result in [
            tracker.get_status("missing").await.map(|_| ()),
            tracker.request_cancel("missing").await.map(|_| ()),
            tracker.export_result("missing").await.map(|_| ()),
            tracker.delete_session("missing").await,
        ] {
            assert!(matches!(
                result,
                Err(AppError::Analysis(AnalysisError::SessionNotFound { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn test_cancel_ack_for_running_and_finished() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&session.id).await.unwrap();

        let ack = tracker.request_cancel(&session.id).await.unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.status, SessionStatus::Running);
        assert!(tracker.is_cancel_requested(&session.id).await.unwrap());

        tracker
            .finish(&session.id, TerminationReason::Cancelled, None)
            .await
            .unwrap();
        let ack = tracker.request_cancel(&session.id).await.unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.status, SessionStatus::Cancelled);
        assert_eq!(ack.message, "Analysis is no longer running");
    }

    #[tokio::test]
    async fn test_export_requires_terminal_session() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();

        let err = tracker.export_result(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Analysis(AnalysisError::NotTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_export_digest() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&session.id).await.unwrap();

        let draft = Draft::new(vec![
            crate::analysis::DraftSection::new("recommendation", "Buy"),
            crate::analysis::DraftSection::new("confidence_level", "Medium"),
        ]);
        tracker.record_draft(&session.id, &draft).await.unwrap();
        tracker
            .finish(&session.id, TerminationReason::QualityMet, None)
            .await
            .unwrap();

        let export = tracker.export_result(&session.id).await.unwrap();
        assert_eq!(export.termination_reason, TerminationReason::QualityMet);
        assert_eq!(export.final_recommendation.as_deref(), Some("Buy"));
        assert_eq!(export.confidence_level.as_deref(), Some("Medium"));
        assert_eq!(export.stats.iterations, 0);
        assert_eq!(export.final_draft, Some(draft));
    }

    #[tokio::test]
    async fn test_delete_refuses_active_session() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();

        let err = tracker.delete_session(&session.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Analysis(AnalysisError::SessionActive { .. })
        ));

        tracker
            .finish(&session.id, TerminationReason::Cancelled, None)
            .await
            .unwrap();
        tracker.delete_session(&session.id).await.unwrap();
        assert!(tracker.get_session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_subscribers_see_phase_and_status() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();
        let mut rx = tracker.subscribe(&session.id).await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SessionStatus::Pending);

        tracker.mark_running(&session.id).await.unwrap();
        tracker
            .set_phase(&session.id, IterationPhase::Retrieving)
            .await;
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.status, SessionStatus::Running);
        assert_eq!(snapshot.phase, Some(IterationPhase::Retrieving));

        let status = tracker.get_status(&session.id).await.unwrap();
        assert_eq!(status.phase, Some(IterationPhase::Retrieving));
    }

    #[tokio::test]
    async fn test_finish_releases_progress_channel() {
        let tracker = tracker();
        let session = tracker.create_session(QUERY, None).await.unwrap();
        let rx = tracker.subscribe(&session.id).await.unwrap();
        tracker.mark_running(&session.id).await.unwrap();
        assert_eq!(tracker.channels.read().await.len(), 1);

        tracker
            .finish(&session.id, TerminationReason::MaxIterations, None)
            .await
            .unwrap();

        assert!(tracker.channels.read().await.is_empty());
        assert_eq!(rx.borrow().status, SessionStatus::Completed);

        let late = tracker.subscribe(&session.id).await.unwrap();
        assert_eq!(late.borrow().status, SessionStatus::Completed);
        tracker.request_cancel(&session.id).await.unwrap();
        assert!(tracker.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted_fails_running_and_reports_pending() {
        let tracker = tracker();
        let running = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&running.id).await.unwrap();
        let pending = tracker.create_session(QUERY, None).await.unwrap();
        let done = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&done.id).await.unwrap();
        tracker
            .finish(&done.id, TerminationReason::QualityMet, None)
            .await
            .unwrap();

        let recovery = tracker.recover_interrupted().await.unwrap();
        assert_eq!(recovery.failed, vec![running.id.clone()]);
        assert_eq!(recovery.pending, vec![pending.id.clone()]);

        let status = tracker.get_status(&running.id).await.unwrap();
        assert_eq!(status.status, SessionStatus::Failed);
        assert_eq!(status.termination_reason, Some(TerminationReason::Error));
        assert_eq!(status.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));

        let export = tracker.export_result(&running.id).await.unwrap();
        assert_eq!(export.termination_reason, TerminationReason::Error);
        tracker.delete_session(&running.id).await.unwrap();

        let done_status = tracker.get_status(&done.id).await.unwrap();
        assert_eq!(done_status.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_sessions_removes_finished_and_reports_unknown() {
        let tracker = tracker();
        let mut finished = Vec::new();
        for _ in 0..2 {
            let session = tracker.create_session(QUERY, None).await.unwrap();
            tracker.mark_running(&session.id).await.unwrap();
            tracker
                .finish(&session.id, TerminationReason::MaxIterations, None)
                .await
                .unwrap();
            finished.push(session.id);
        }
        let ids = vec![
            finished[0].clone(),
            "missing".to_string(),
            finished[1].clone(),
            finished[0].clone(),
        ];

        let outcome = tracker.delete_sessions(&ids).await.unwrap();
        assert_eq!(outcome.deleted, finished);
        assert_eq!(outcome.not_found, vec!["missing".to_string()]);
        assert_eq!(tracker.session_counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_delete_sessions_refuses_batch_with_active_session() {
        let tracker = tracker();
        let done = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&done.id).await.unwrap();
        tracker
            .finish(&done.id, TerminationReason::QualityMet, None)
            .await
            .unwrap();
        let pending = tracker.create_session(QUERY, None).await.unwrap();

        let err = tracker
            .delete_sessions(&[done.id.clone(), pending.id.clone()])
            .await
            .unwrap_err();
        match err {
            AppError::Analysis(AnalysisError::SessionsActive { session_ids }) => {
                assert_eq!(session_ids, vec![pending.id.clone()]);
            }
            other => panic!("Expected SessionsActive, got {:?}", other),
        }
        assert!(tracker.get_session(&done.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_counts_by_status() {
        let tracker = tracker();
        let running = tracker.create_session(QUERY, None).await.unwrap();
        tracker.mark_running(&running.id).await.unwrap();
        tracker.create_session(QUERY, None).await.unwrap();
        let cancelled = tracker.create_session(QUERY, None).await.unwrap();
        tracker
            .finish(&cancelled.id, TerminationReason::Cancelled, None)
            .await
            .unwrap();

        let counts = tracker.session_counts().await.unwrap();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.active(), 2);
        assert_eq!(counts.total(), 3);
    }
}
