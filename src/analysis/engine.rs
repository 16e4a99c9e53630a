//! Spawns orchestrator runs, bounded by the concurrent-session cap.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::orchestrator::AnalysisOrchestrator;
use super::tracker::{AnalysisExport, ProgressTracker, Recovery};
use super::types::AnalysisSession;
use crate::collaborators::{CallPolicy, Collaborators};
use crate::config::{AnalysisConfig, RequestConfig};
use crate::error::AppResult;
use crate::storage::SessionStore;

/// A session whose run has been scheduled.
pub struct StartedSession {
    pub session: AnalysisSession,
    /// Completes when the run ends.
    pub task: JoinHandle<()>,
}

/// Entry point for starting analyses.
///
/// Each session runs on its own task. At most `max_concurrent_sessions`
/// run at once; the rest stay `pending` until a slot frees up.
#[derive(Clone)]
pub struct AnalysisEngine {
    orchestrator: Arc<AnalysisOrchestrator>,
    permits: Arc<Semaphore>,
}

impl AnalysisEngine {
    /// Build an engine that logs every collaborator call to `store`.
    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn SessionStore>,
        request: &RequestConfig,
        config: AnalysisConfig,
    ) -> Self {
        let policy = CallPolicy::from_config(request).with_invocation_log(store.clone());
        let tracker = Arc::new(ProgressTracker::new(store, config.clone()));
        Self::with_policy(collaborators, tracker, policy, config)
    }

    pub fn with_policy(
        collaborators: Collaborators,
        tracker: Arc<ProgressTracker>,
        policy: CallPolicy,
        config: AnalysisConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1)));
        Self {
            orchestrator: Arc::new(AnalysisOrchestrator::new(
                collaborators,
                tracker,
                policy,
                config,
            )),
            permits,
        }
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        self.orchestrator.tracker()
    }

    /// Create a session and schedule its run.
    pub async fn start(&self, query: &str, scope: Option<&str>) -> AppResult<StartedSession> {
        let session = self.tracker().create_session(query, scope).await?;
        let task = self.spawn(session.id.clone());
        Ok(StartedSession { session, task })
    }

    /// Schedule an existing pending session.
    pub fn spawn(&self, session_id: String) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Session slots closed");
                    return;
                }
            };
            debug!(session_id = %session_id, "Session slot acquired");

            if let Err(e) = orchestrator.run(&session_id).await {
                error!(session_id = %session_id, error = %e, "Analysis run aborted");
            }
        })
    }

    /// Fail sessions a previous process left running and reschedule the
    /// pending ones.
    pub async fn recover(&self) -> AppResult<Recovery> {
        let recovery = self.tracker().recover_interrupted().await?;
        for session_id in &recovery.pending {
            // Detached: the run owns the session from here on.
            drop(self.spawn(session_id.clone()));
        }
        Ok(recovery)
    }

    /// Run a new session on the current task and export it.
    pub async fn run_to_completion(
        &self,
        query: &str,
        scope: Option<&str>,
    ) -> AppResult<AnalysisExport> {
        let session = self.tracker().create_session(query, scope).await?;
        self.orchestrator.run(&session.id).await?;
        self.tracker().export_result(&session.id).await
    }
}
