//! The refinement loop.
//!
//! Per iteration: evaluate, then either stop on quality or plan queries,
//! retrieve, validate, aggregate and commit. Cancellation is observed
//! between stages and enforced atomically by the commit itself, so a
//! session never holds a partial iteration.

use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::aggregator::Aggregator;
use super::evaluation::EvaluationStep;
use super::pipeline::RetrievalPipeline;
use super::planner::QueryPlanner;
use super::tracker::ProgressTracker;
use super::types::{
    AnalysisSession, Draft, IterationPhase, IterationRecord, SessionStatus, TerminationReason,
};
use crate::collaborators::{CallPolicy, Collaborators, Generator};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, AppResult, CollaboratorError, StorageError};

/// Why the loop stopped early.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Failed(String),
}

impl From<CollaboratorError> for Interrupt {
    fn from(err: CollaboratorError) -> Self {
        Interrupt::Failed(err.to_string())
    }
}

impl From<StorageError> for Interrupt {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CancelRequested { .. } => Interrupt::Cancelled,
            other => Interrupt::Failed(other.to_string()),
        }
    }
}

/// Drives sessions from pending to a terminal state.
pub struct AnalysisOrchestrator {
    generator: Arc<dyn Generator>,
    evaluation: EvaluationStep,
    planner: QueryPlanner,
    pipeline: RetrievalPipeline,
    aggregator: Aggregator,
    tracker: Arc<ProgressTracker>,
    policy: CallPolicy,
    config: AnalysisConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        collaborators: Collaborators,
        tracker: Arc<ProgressTracker>,
        policy: CallPolicy,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            evaluation: EvaluationStep::new(collaborators.evaluator.clone(), policy.clone()),
            planner: QueryPlanner::new(config.max_queries_per_iteration),
            pipeline: RetrievalPipeline::new(
                &collaborators,
                policy.clone(),
                config.trusted_sources.clone(),
                config.retrieval_concurrency,
            ),
            aggregator: Aggregator::new(
                collaborators.generator.clone(),
                policy.clone(),
                config.max_evidence,
            ),
            generator: collaborators.generator,
            tracker,
            policy,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Run a pending session to completion and return why it stopped.
    ///
    /// Collaborator and storage failures end the session as `failed` and
    /// are reported through the returned reason, not as an `Err`. Errors are
    /// returned only when the session cannot be loaded or finished.
    pub async fn run(&self, session_id: &str) -> AppResult<TerminationReason> {
        let session = self.tracker.get_session(session_id).await?;
        if session.status != SessionStatus::Pending {
            return Err(AnalysisError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Running,
            }
            .into());
        }

        if session.cancel_requested {
            info!(session_id = %session_id, "Cancelled before start");
            self.tracker
                .finish(session_id, TerminationReason::Cancelled, None)
                .await?;
            return Ok(TerminationReason::Cancelled);
        }

        self.tracker.mark_running(session_id).await?;
        info!(
            session_id = %session_id,
            threshold = self.config.quality_threshold,
            max_iterations = self.config.max_iterations,
            "Analysis started"
        );

        let (reason, message) = match self.drive(&session).await {
            Ok(reason) => (reason, None),
            Err(Interrupt::Cancelled) => (TerminationReason::Cancelled, None),
            Err(Interrupt::Failed(message)) => {
                error!(session_id = %session_id, error = %message, "Analysis failed");
                (TerminationReason::Error, Some(message))
            }
        };

        self.tracker
            .finish(session_id, reason, message.as_deref())
            .await?;
        info!(session_id = %session_id, reason = %reason, "Analysis finished");
        Ok(reason)
    }

    async fn drive(&self, session: &AnalysisSession) -> Result<TerminationReason, Interrupt> {
        let id = session.id.as_str();
        let query = session.query.as_str();
        let scope = session.scope_filter.as_deref();

        self.check_cancel(id).await?;
        let mut draft = self.generate_initial(id, query, scope).await?;
        self.tracker.record_draft(id, &draft).await?;

        let mut issued: HashSet<String> = HashSet::new();
        let mut collected = 0usize;

        for index in 0..self.config.max_iterations {
            self.check_cancel(id).await?;
            self.tracker.set_phase(id, IterationPhase::Evaluating).await;
            let evaluation = self.evaluation.evaluate(id, &draft, query, scope).await?;

            info!(
                session_id = %id,
                iteration = index,
                score = evaluation.score,
                gaps = evaluation.gaps.len(),
                "Iteration evaluated"
            );

            if evaluation.score >= self.config.quality_threshold {
                let record = IterationRecord {
                    index,
                    pre_draft: draft.clone(),
                    post_draft: draft,
                    score: evaluation.score,
                    gaps: evaluation.gaps,
                    queries: Vec::new(),
                    evidence: Vec::new(),
                    updated_sections: Vec::new(),
                    created_at: Utc::now(),
                };
                self.check_cancel(id).await?;
                self.tracker.set_phase(id, IterationPhase::Committing).await;
                self.tracker.commit_iteration(id, &record).await?;
                return Ok(TerminationReason::QualityMet);
            }

            self.tracker.set_phase(id, IterationPhase::Planning).await;
            let budget = self.aggregator.remaining_budget(collected);
            let queries = self.planner.plan(&evaluation.gaps, &issued, scope, budget);
            if budget == 0 {
                debug!(session_id = %id, iteration = index, "Evidence cap reached, no retrieval");
            } else if queries.is_empty() {
                debug!(session_id = %id, iteration = index, "No new queries to issue");
            }

            self.check_cancel(id).await?;
            self.tracker.set_phase(id, IterationPhase::Retrieving).await;
            let primaries = self.pipeline.retrieve_all(id, &queries).await;

            self.check_cancel(id).await?;
            self.tracker.set_phase(id, IterationPhase::Validating).await;
            let evidence = self.pipeline.validate_all(id, primaries).await;

            self.check_cancel(id).await?;
            self.tracker.set_phase(id, IterationPhase::Aggregating).await;
            let aggregation = self
                .aggregator
                .aggregate(id, &draft, evidence, collected)
                .await?;

            let record = IterationRecord {
                index,
                pre_draft: draft,
                post_draft: aggregation.post_draft,
                score: evaluation.score,
                gaps: evaluation.gaps,
                queries,
                evidence: aggregation.evidence,
                updated_sections: aggregation.updated_sections,
                created_at: Utc::now(),
            };

            self.check_cancel(id).await?;
            self.tracker.set_phase(id, IterationPhase::Committing).await;
            self.tracker.commit_iteration(id, &record).await?;

            issued.extend(record.queries.iter().map(|q| q.text.clone()));
            collected += record.evidence.len();
            debug!(
                session_id = %id,
                iteration = index,
                queries = record.queries.len(),
                evidence = record.evidence.len(),
                collected,
                "Iteration committed"
            );
            draft = record.post_draft;
        }

        Ok(TerminationReason::MaxIterations)
    }

    async fn generate_initial(
        &self,
        session_id: &str,
        query: &str,
        scope: Option<&str>,
    ) -> Result<Draft, Interrupt> {
        let generator = &self.generator;
        let draft = self
            .policy
            .call(
                session_id,
                "generate",
                json!({ "query": query, "scope": scope }),
                move || generator.generate(query, scope),
            )
            .await?;

        if draft.is_empty() {
            warn!(session_id = %session_id, "Initial draft is empty");
        }
        Ok(draft)
    }

    async fn check_cancel(&self, session_id: &str) -> Result<(), Interrupt> {
        if self.tracker.is_cancel_requested(session_id).await? {
            info!(session_id = %session_id, "Cancellation observed");
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }
}
