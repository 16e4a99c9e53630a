use std::env;
use std::path::PathBuf;

use crate::analysis::SourceCategory;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub analysis: AnalysisConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Collaborator call policy: per-attempt timeout and bounded retries.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe names, one per collaborator role
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub generation: String,
    pub evaluation: String,
    pub retrieval: String,
    pub validation: String,
    pub fallback: String,
}

/// Refinement loop limits and thresholds
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Score (0-10) at or above which a draft is considered complete.
    pub quality_threshold: f64,
    /// Hard cap on recorded iterations per session.
    pub max_iterations: u32,
    /// Maximum new retrieval queries planned per iteration.
    pub max_queries_per_iteration: usize,
    /// Maximum evidence items collected over a whole session.
    pub max_evidence: usize,
    /// Concurrent retrieve/validate pipelines within one iteration.
    pub retrieval_concurrency: usize,
    /// Sessions allowed to run at the same time.
    pub max_concurrent_sessions: usize,
    pub min_query_length: usize,
    pub max_query_length: usize,
    /// Source categories the fallback search may draw from.
    pub trusted_sources: Vec<SourceCategory>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        Self::load(true)
    }

    /// Load configuration for runs that never call Langbase.
    ///
    /// `LANGBASE_API_KEY` becomes optional.
    pub fn from_env_offline() -> Result<Self, AppError> {
        Self::load(false)
    }

    fn load(require_api_key: bool) -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = match env::var("LANGBASE_API_KEY") {
            Ok(key) => key,
            Err(_) if !require_api_key => String::new(),
            Err(_) => {
                return Err(AppError::Config {
                    message: "LANGBASE_API_KEY is required".to_string(),
                })
            }
        };

        let langbase = LangbaseConfig {
            api_key,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/analysis.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", defaults.retry_delay_ms),
        };

        let default_pipes = PipeConfig::default();
        let pipes = PipeConfig {
            generation: env::var("PIPE_GENERATION").unwrap_or(default_pipes.generation),
            evaluation: env::var("PIPE_EVALUATION").unwrap_or(default_pipes.evaluation),
            retrieval: env::var("PIPE_RETRIEVAL").unwrap_or(default_pipes.retrieval),
            validation: env::var("PIPE_VALIDATION").unwrap_or(default_pipes.validation),
            fallback: env::var("PIPE_FALLBACK").unwrap_or(default_pipes.fallback),
        };

        let analysis = AnalysisConfig::from_env()?;

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            analysis,
        })
    }
}

impl AnalysisConfig {
    /// Read loop settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let trusted_sources = match env::var("TRUSTED_SOURCE_CATEGORIES") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<SourceCategory>()
                        .map_err(|message| AppError::Config { message })
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => defaults.trusted_sources.clone(),
        };

        let config = Self {
            quality_threshold: env_parse("ANALYSIS_QUALITY_THRESHOLD", defaults.quality_threshold),
            max_iterations: env_parse("ANALYSIS_MAX_ITERATIONS", defaults.max_iterations),
            max_queries_per_iteration: env_parse(
                "ANALYSIS_MAX_QUERIES_PER_ITERATION",
                defaults.max_queries_per_iteration,
            ),
            max_evidence: env_parse("ANALYSIS_MAX_EVIDENCE", defaults.max_evidence),
            retrieval_concurrency: env_parse(
                "ANALYSIS_RETRIEVAL_CONCURRENCY",
                defaults.retrieval_concurrency,
            ),
            max_concurrent_sessions: env_parse(
                "ANALYSIS_MAX_CONCURRENT_SESSIONS",
                defaults.max_concurrent_sessions,
            ),
            min_query_length: env_parse("ANALYSIS_MIN_QUERY_LENGTH", defaults.min_query_length),
            max_query_length: env_parse("ANALYSIS_MAX_QUERY_LENGTH", defaults.max_query_length),
            trusted_sources,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the refinement loop cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |message: &str| {
            Err(AppError::Config {
                message: message.to_string(),
            })
        };

        if !(0.0..=10.0).contains(&self.quality_threshold) {
            return fail("ANALYSIS_QUALITY_THRESHOLD must be within [0, 10]");
        }
        if self.max_iterations == 0 {
            return fail("ANALYSIS_MAX_ITERATIONS must be at least 1");
        }
        if self.max_queries_per_iteration == 0 {
            return fail("ANALYSIS_MAX_QUERIES_PER_ITERATION must be at least 1");
        }
        if self.max_evidence == 0 {
            return fail("ANALYSIS_MAX_EVIDENCE must be at least 1");
        }
        if self.retrieval_concurrency == 0 {
            return fail("ANALYSIS_RETRIEVAL_CONCURRENCY must be at least 1");
        }
        if self.max_concurrent_sessions == 0 {
            return fail("ANALYSIS_MAX_CONCURRENT_SESSIONS must be at least 1");
        }
        if self.min_query_length > self.max_query_length {
            return fail("ANALYSIS_MIN_QUERY_LENGTH exceeds ANALYSIS_MAX_QUERY_LENGTH");
        }
        if self.trusted_sources.is_empty() {
            return fail("TRUSTED_SOURCE_CATEGORIES must name at least one category");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            generation: "analysis-generation-v1".to_string(),
            evaluation: "analysis-evaluation-v1".to_string(),
            retrieval: "analysis-retrieval-v1".to_string(),
            validation: "analysis-validation-v1".to_string(),
            fallback: "analysis-fallback-search-v1".to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 7.0,
            max_iterations: 10,
            max_queries_per_iteration: 5,
            max_evidence: 50,
            retrieval_concurrency: 5,
            max_concurrent_sessions: 8,
            min_query_length: 10,
            max_query_length: 1000,
            trusted_sources: SourceCategory::all().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_default() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_analysis_config_default_is_valid() {
        let config = AnalysisConfig::default();
        assert_eq!(config.quality_threshold, 7.0);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.max_queries_per_iteration, 5);
        assert_eq!(config.max_evidence, 50);
        assert_eq!(config.retrieval_concurrency, 5);
        assert_eq!(config.trusted_sources.len(), SourceCategory::all().len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_analysis_config_rejects_out_of_range_threshold() {
        let config = AnalysisConfig {
            quality_threshold: 11.0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ANALYSIS_QUALITY_THRESHOLD"));
    }

    #[test]
    fn test_analysis_config_rejects_zero_limits() {
        let zero_iterations = AnalysisConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(zero_iterations.validate().is_err());

        let zero_fanout = AnalysisConfig {
            retrieval_concurrency: 0,
            ..Default::default()
        };
        assert!(zero_fanout.validate().is_err());

        let no_sources = AnalysisConfig {
            trusted_sources: vec![],
            ..Default::default()
        };
        assert!(no_sources.validate().is_err());
    }

    #[test]
    fn test_pipe_config_default_names() {
        let pipes = PipeConfig::default();
        assert_eq!(pipes.generation, "analysis-generation-v1");
        assert_eq!(pipes.fallback, "analysis-fallback-search-v1");
    }
}
