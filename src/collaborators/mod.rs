//! External collaborator contracts consumed by the refinement loop.
//!
//! Each capability is a separate trait so backends can be swapped one at a
//! time. [`LangbaseCollaborators`] implements all five against Langbase
//! pipes; [`fakes`] provides deterministic scripted implementations.

mod call;
pub mod fakes;
mod langbase;

pub use call::CallPolicy;
pub use langbase::LangbaseCollaborators;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analysis::{
    Draft, EvidenceItem, GapDescriptor, QualityIndicators, RetrievalQuery, SourceAttribution,
    SourceCategory,
};
use crate::error::CollaboratorResult;

/// Score and gaps produced by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Raw completeness score; clamped to [0, 10] by the evaluation step.
    pub score: f64,
    pub gaps: Vec<GapDescriptor>,
}

/// Primary index answer for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub content: String,
    /// Retriever confidence in [0, 1].
    pub confidence: f64,
}

/// Validator verdict on a primary answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub reasoning: String,
    pub confidence: f64,
}

/// Fallback search answer restricted to trusted sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResult {
    pub content: String,
    pub attribution: Vec<SourceAttribution>,
    #[serde(default)]
    pub quality_indicators: Option<QualityIndicators>,
}

/// Produces and refines drafts.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Initial draft for a query.
    async fn generate(&self, query: &str, scope: Option<&str>) -> CollaboratorResult<Draft>;

    /// Refined draft incorporating `evidence`, most trustworthy first.
    async fn refine(&self, draft: &Draft, evidence: &[EvidenceItem]) -> CollaboratorResult<Draft>;
}

/// Scores a draft's completeness and lists its gaps.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        draft: &Draft,
        query: &str,
        scope: Option<&str>,
    ) -> CollaboratorResult<Evaluation>;
}

/// Primary index lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> CollaboratorResult<RetrievalResponse>;
}

/// Certifies primary answers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        query: &RetrievalQuery,
        response: &RetrievalResponse,
    ) -> CollaboratorResult<ValidationVerdict>;
}

/// Secondary search over an allow-list of trusted source categories.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackSearcher: Send + Sync {
    async fn fallback_search(
        &self,
        query: &RetrievalQuery,
        allowed: &[SourceCategory],
    ) -> CollaboratorResult<FallbackResult>;
}

/// Handles to every collaborator an orchestrator needs.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub evaluator: Arc<dyn Evaluator>,
    pub retriever: Arc<dyn Retriever>,
    pub validator: Arc<dyn Validator>,
    pub fallback: Arc<dyn FallbackSearcher>,
}

impl Collaborators {
    /// Use one backend for every role.
    pub fn uniform<B>(backend: Arc<B>) -> Self
    where
        B: Generator + Evaluator + Retriever + Validator + FallbackSearcher + 'static,
    {
        Self {
            generator: backend.clone(),
            evaluator: backend.clone(),
            retriever: backend.clone(),
            validator: backend.clone(),
            fallback: backend,
        }
    }
}
