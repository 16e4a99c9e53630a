//! Evaluation step: scores a draft and reports its gaps.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{clamp_score, Draft};
use crate::collaborators::{CallPolicy, Evaluation, Evaluator};
use crate::error::{CollaboratorError, CollaboratorResult};

/// Wraps the evaluator with the call policy and score normalization.
///
/// Output depends only on `(draft, query, scope)` and the evaluator, so a
/// deterministic evaluator yields identical evaluations for identical input.
#[derive(Clone)]
pub struct EvaluationStep {
    evaluator: Arc<dyn Evaluator>,
    policy: CallPolicy,
}

impl EvaluationStep {
    pub fn new(evaluator: Arc<dyn Evaluator>, policy: CallPolicy) -> Self {
        Self { evaluator, policy }
    }

    /// Evaluate `draft`, clamping the score into [0, 10].
    ///
    /// A NaN score is reported as an invalid response.
    pub async fn evaluate(
        &self,
        session_id: &str,
        draft: &Draft,
        query: &str,
        scope: Option<&str>,
    ) -> CollaboratorResult<Evaluation> {
        let evaluator = &self.evaluator;
        let raw = self
            .policy
            .call(
                session_id,
                "evaluate",
                json!({ "revision": draft.revision, "query": query, "scope": scope }),
                move || evaluator.evaluate(draft, query, scope),
            )
            .await?;

        let score = clamp_score(raw.score).ok_or_else(|| CollaboratorError::InvalidResponse {
            operation: "evaluate".to_string(),
            message: "completeness score is not a number".to_string(),
        })?;

        if score != raw.score {
            warn!(
                session_id = %session_id,
                raw_score = raw.score,
                score,
                "Evaluator score out of range, clamped"
            );
        }

        debug!(
            session_id = %session_id,
            revision = draft.revision,
            score,
            gaps = raw.gaps.len(),
            "Draft evaluated"
        );

        Ok(Evaluation {
            score,
            gaps: raw.gaps,
        })
    }
}
