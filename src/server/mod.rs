//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::analysis::{AnalysisEngine, ProgressTracker};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::storage::SessionStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Session store backing every analysis.
    pub store: Arc<dyn SessionStore>,
    /// Schedules analysis runs.
    pub engine: AnalysisEngine,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, store: Arc<dyn SessionStore>, collaborators: Collaborators) -> Self {
        tracing::info!(
            generation_pipe = %config.pipes.generation,
            evaluation_pipe = %config.pipes.evaluation,
            retrieval_pipe = %config.pipes.retrieval,
            threshold = config.analysis.quality_threshold,
            max_iterations = config.analysis.max_iterations,
            "AppState initializing"
        );

        let engine = AnalysisEngine::new(
            collaborators,
            store.clone(),
            &config.request,
            config.analysis.clone(),
        );

        Self {
            config,
            store,
            engine,
        }
    }

    /// Build state around an existing engine.
    pub fn with_engine(config: Config, store: Arc<dyn SessionStore>, engine: AnalysisEngine) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }

    /// Session control surface.
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        self.engine.tracker()
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{
        FallbackScript, ScriptedEvaluator, ScriptedFallback, ScriptedGenerator, ScriptedRetriever,
        ScriptedValidator, ValidationScript,
    };
    use crate::config::{
        AnalysisConfig, DatabaseConfig, LangbaseConfig, LogFormat, LoggingConfig, PipeConfig,
        RequestConfig,
    };
    use crate::storage::{MemoryStorage, SqliteStorage};
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            langbase: LangbaseConfig {
                api_key: "test-key".to_string(),
                base_url: "https://api.langbase.com".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            pipes: PipeConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }

    fn scripted() -> Collaborators {
        Collaborators {
            generator: Arc::new(ScriptedGenerator::new()),
            evaluator: Arc::new(ScriptedEvaluator::constant(8.0)),
            retriever: Arc::new(ScriptedRetriever::answering()),
            validator: Arc::new(ScriptedValidator::new(ValidationScript::Pass)),
            fallback: Arc::new(ScriptedFallback::new(FallbackScript::Succeed)),
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let state = AppState::new(
            create_test_config(),
            Arc::new(MemoryStorage::new()),
            scripted(),
        );
        assert_eq!(state.config.langbase.api_key, "test-key");
        assert_eq!(state.config.analysis.max_iterations, 10);
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let state = AppState::new(
            create_test_config(),
            Arc::new(MemoryStorage::new()),
            scripted(),
        );
        let shared: SharedState = Arc::new(state);

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_app_state_tracker_uses_store() {
        let store: Arc<dyn SessionStore> = Arc::new(SqliteStorage::new_in_memory().await.unwrap());
        let state = AppState::new(create_test_config(), store.clone(), scripted());

        let session = state
            .tracker()
            .create_session("Evaluate ACME Corp as a long-term holding", None)
            .await
            .unwrap();
        let stored = store.get_session(&session.id).await.unwrap();
        assert!(stored.is_some());
    }
}
