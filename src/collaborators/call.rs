use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config::RequestConfig;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::storage::{Invocation, SessionStore};

/// Timeout and retry policy applied to every collaborator call.
///
/// Each attempt is bounded by `timeout`. Retryable failures (timeouts and
/// transient transport errors) are retried up to `max_retries` times with
/// exponential backoff; once exhausted they surface as
/// [`CollaboratorError::Unavailable`], which is not retryable.
#[derive(Clone)]
pub struct CallPolicy {
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
    log: Option<Arc<dyn SessionStore>>,
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_retries,
            base_delay,
            log: None,
        }
    }

    pub fn from_config(config: &RequestConfig) -> Self {
        Self::new(
            Duration::from_millis(config.timeout_ms),
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// Record every call in the store's invocation log.
    pub fn with_invocation_log(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.log = Some(store);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `attempt` under this policy.
    pub async fn call<T, F, Fut>(
        &self,
        session_id: &str,
        operation: &str,
        input: Value,
        mut attempt: F,
    ) -> CollaboratorResult<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = CollaboratorResult<T>>,
    {
        let start = Instant::now();
        let mut retries = 0;
        let mut attempts = 0;

        let outcome = loop {
            if retries > 0 {
                let delay = self.base_delay * 2_u32.saturating_pow(retries - 1);
                warn!(
                    session_id = %session_id,
                    operation = %operation,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying collaborator call"
                );
                tokio::time::sleep(delay).await;
            }

            attempts += 1;
            let attempt_start = Instant::now();
            let result = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => {
                    debug!(
                        session_id = %session_id,
                        operation = %operation,
                        latency_ms = attempt_start.elapsed().as_millis(),
                        attempts,
                        "Collaborator call succeeded"
                    );
                    break Ok(value);
                }
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    warn!(
                        session_id = %session_id,
                        operation = %operation,
                        error = %e,
                        latency_ms = attempt_start.elapsed().as_millis(),
                        retry = retries,
                        "Collaborator call failed, will retry"
                    );
                    retries += 1;
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        session_id = %session_id,
                        operation = %operation,
                        error = %e,
                        retries,
                        "Collaborator retries exhausted"
                    );
                    break Err(CollaboratorError::Unavailable {
                        operation: operation.to_string(),
                        message: e.to_string(),
                        retries,
                    });
                }
                Err(e) => {
                    error!(
                        session_id = %session_id,
                        operation = %operation,
                        error = %e,
                        "Collaborator call failed"
                    );
                    break Err(e);
                }
            }
        };

        self.record(session_id, operation, input, &outcome, attempts, start)
            .await;
        outcome
    }

    async fn record<T: Serialize>(
        &self,
        session_id: &str,
        operation: &str,
        input: Value,
        outcome: &CollaboratorResult<T>,
        attempts: u32,
        start: Instant,
    ) {
        let Some(store) = &self.log else {
            return;
        };

        let latency_ms = start.elapsed().as_millis() as i64;
        let invocation = Invocation::new(operation, input).with_session(session_id);
        let invocation = match outcome {
            Ok(value) => invocation.success(
                serde_json::to_value(value).unwrap_or(Value::Null),
                attempts,
                latency_ms,
            ),
            Err(e) => invocation.failure(e.to_string(), attempts, latency_ms),
        };

        if let Err(e) = store.log_invocation(&invocation).await {
            warn!(
                session_id = %session_id,
                operation = %operation,
                error = %e,
                "Failed to log invocation"
            );
        }
    }
}
