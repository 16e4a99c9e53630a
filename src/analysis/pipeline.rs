//! Two-tier retrieval: primary index, validation, then trusted fallback.
//!
//! Per-query failures never abort an iteration. Each query yields exactly
//! one [`EvidenceItem`], degraded to a low-confidence primary item when
//! neither tier produces a usable answer.

use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::quality::QualityAssessment;
use super::types::{EvidenceItem, RetrievalQuery, SourceCategory};
use crate::collaborators::{
    CallPolicy, Collaborators, FallbackSearcher, RetrievalResponse, Retriever, Validator,
};
use crate::error::{CollaboratorError, CollaboratorResult};

/// Multiplier applied to the confidence of primary answers kept after the
/// fallback failed.
pub const DEGRADED_CONFIDENCE_FACTOR: f64 = 0.5;

/// Upper bound on the confidence of fallback evidence below quality standards.
pub const LOW_QUALITY_CONFIDENCE_CAP: f64 = 0.3;

/// Outcome of the primary retrieval for one query.
#[derive(Debug)]
pub struct PrimaryResult {
    pub query: RetrievalQuery,
    pub outcome: CollaboratorResult<RetrievalResponse>,
}

/// Runs retrieval and validation for an iteration's queries.
#[derive(Clone)]
pub struct RetrievalPipeline {
    retriever: Arc<dyn Retriever>,
    validator: Arc<dyn Validator>,
    fallback: Arc<dyn FallbackSearcher>,
    policy: CallPolicy,
    trusted: Vec<SourceCategory>,
    concurrency: usize,
}

impl RetrievalPipeline {
    pub fn new(
        collaborators: &Collaborators,
        policy: CallPolicy,
        trusted: Vec<SourceCategory>,
        concurrency: usize,
    ) -> Self {
        Self {
            retriever: collaborators.retriever.clone(),
            validator: collaborators.validator.clone(),
            fallback: collaborators.fallback.clone(),
            policy,
            trusted,
            concurrency: concurrency.max(1),
        }
    }

    /// Retrieve and validate every query; results follow query order.
    pub async fn collect(&self, session_id: &str, queries: &[RetrievalQuery]) -> Vec<EvidenceItem> {
        let primaries = self.retrieve_all(session_id, queries).await;
        self.validate_all(session_id, primaries).await
    }

    /// Query the primary index for every query, at most `concurrency` at once.
    pub async fn retrieve_all(
        &self,
        session_id: &str,
        queries: &[RetrievalQuery],
    ) -> Vec<PrimaryResult> {
        if queries.is_empty() {
            return Vec::new();
        }

        debug!(
            session_id = %session_id,
            queries = queries.len(),
            concurrency = self.concurrency,
            "Retrieving from primary index"
        );

        stream::iter(queries.iter().cloned())
            .map(|query| self.retrieve_one(session_id, query))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Validate primary results, falling back where needed.
    pub async fn validate_all(
        &self,
        session_id: &str,
        primaries: Vec<PrimaryResult>,
    ) -> Vec<EvidenceItem> {
        let evidence: Vec<EvidenceItem> = stream::iter(primaries)
            .map(|primary| self.validate_one(session_id, primary))
            .buffered(self.concurrency)
            .collect()
            .await;

        if !evidence.is_empty() {
            info!(
                session_id = %session_id,
                evidence = evidence.len(),
                fallback = evidence
                    .iter()
                    .filter(|e| !e.attribution.is_empty())
                    .count(),
                low_confidence = evidence.iter().filter(|e| e.low_confidence).count(),
                "Evidence collected"
            );
        }
        evidence
    }

    async fn retrieve_one(&self, session_id: &str, query: RetrievalQuery) -> PrimaryResult {
        let retriever = &self.retriever;
        let q = &query;
        let outcome = self
            .policy
            .call(
                session_id,
                "retrieve",
                json!({ "query": q.text }),
                move || retriever.retrieve(q),
            )
            .await;
        PrimaryResult { query, outcome }
    }

    async fn validate_one(&self, session_id: &str, primary: PrimaryResult) -> EvidenceItem {
        let PrimaryResult { query, outcome } = primary;

        let response = match outcome {
            Ok(response) if !response.content.trim().is_empty() => response,
            Ok(_) => {
                let reason = CollaboratorError::RetrievalEmpty {
                    query: query.text.clone(),
                };
                debug!(session_id = %session_id, query = %query.text, "Primary index returned nothing");
                return self
                    .fallback_one(session_id, query, None, None, reason.to_string())
                    .await;
            }
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    query = %query.text,
                    error = %e,
                    "Primary retrieval failed"
                );
                return self
                    .fallback_one(session_id, query, None, None, e.to_string())
                    .await;
            }
        };

        let validator = &self.validator;
        let (q, r) = (&query, &response);
        let verdict = self
            .policy
            .call(
                session_id,
                "validate",
                json!({ "query": q.text, "confidence": r.confidence }),
                move || validator.validate(q, r),
            )
            .await;

        match verdict {
            Ok(verdict) if verdict.passed => EvidenceItem::primary(
                query,
                response.content,
                verdict.confidence,
                verdict.reasoning,
            ),
            Ok(verdict) => {
                debug!(
                    session_id = %session_id,
                    query = %query.text,
                    reasoning = %verdict.reasoning,
                    "Primary answer failed validation"
                );
                self.fallback_one(
                    session_id,
                    query,
                    Some(response),
                    Some(verdict.confidence),
                    verdict.reasoning,
                )
                .await
            }
            Err(e) => {
                let inconclusive = CollaboratorError::ValidationInconclusive {
                    message: e.to_string(),
                };
                warn!(
                    session_id = %session_id,
                    query = %query.text,
                    error = %inconclusive,
                    "Validation inconclusive"
                );
                self.fallback_one(session_id, query, Some(response), None, inconclusive.to_string())
                    .await
            }
        }
    }

    async fn fallback_one(
        &self,
        session_id: &str,
        query: RetrievalQuery,
        original: Option<RetrievalResponse>,
        validation_confidence: Option<f64>,
        primary_reason: String,
    ) -> EvidenceItem {
        let fallback = &self.fallback;
        let (q, allowed) = (&query, self.trusted.as_slice());
        let outcome = self
            .policy
            .call(
                session_id,
                "fallback_search",
                json!({ "query": q.text, "allowed": allowed }),
                move || fallback.fallback_search(q, allowed),
            )
            .await;

        let result = match outcome {
            Ok(result) if result.content.trim().is_empty() => {
                return degraded(
                    query,
                    original,
                    validation_confidence,
                    &primary_reason,
                    "fallback search returned no content",
                );
            }
            Ok(result) => result,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    query = %query.text,
                    error = %e,
                    "Fallback search failed, keeping primary answer"
                );
                return degraded(
                    query,
                    original,
                    validation_confidence,
                    &primary_reason,
                    &e.to_string(),
                );
            }
        };

        let attribution: Vec<_> = result
            .attribution
            .into_iter()
            .filter(|a| self.trusted.contains(&a.category) && !a.source.trim().is_empty())
            .collect();

        let assessment = QualityAssessment::assess(&result.content, result.quality_indicators);
        let mut reasoning = format!("Primary answer inadequate: {}", primary_reason);
        let mut confidence = assessment.score;
        if let Some(warning) = assessment.warning() {
            reasoning.push_str("; ");
            reasoning.push_str(&warning);
            confidence = confidence.min(LOW_QUALITY_CONFIDENCE_CAP);
        }

        match EvidenceItem::fallback(query.clone(), result.content, confidence, reasoning, attribution) {
            Some(item) if assessment.meets_standards => item,
            Some(item) => {
                debug!(
                    session_id = %session_id,
                    query = %query.text,
                    score = assessment.score,
                    "Fallback result below quality standards"
                );
                item.flagged_low_confidence()
            }
            None => degraded(
                query,
                original,
                validation_confidence,
                &primary_reason,
                "fallback result cited no trusted source",
            ),
        }
    }
}

/// Keep the unvalidated primary answer at reduced confidence.
fn degraded(
    query: RetrievalQuery,
    original: Option<RetrievalResponse>,
    validation_confidence: Option<f64>,
    primary_reason: &str,
    fallback_error: &str,
) -> EvidenceItem {
    let (content, retrieval_confidence) = original
        .map(|r| (r.content, r.confidence))
        .unwrap_or_default();
    let base = match validation_confidence {
        Some(v) => retrieval_confidence.min(v),
        None => retrieval_confidence,
    };

    EvidenceItem::primary(
        query,
        content,
        base * DEGRADED_CONFIDENCE_FACTOR,
        format!(
            "{}; fallback unavailable: {}",
            primary_reason, fallback_error
        ),
    )
    .flagged_low_confidence()
}
