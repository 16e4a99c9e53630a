//! Deterministic scripted collaborators.
//!
//! Used by the integration tests and the `run --offline` CLI path. Every fake
//! counts its calls so tests can assert on how often each role was invoked.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::{
    Collaborators, Evaluation, Evaluator, FallbackResult, FallbackSearcher, Generator, RetrievalResponse,
    Retriever, ValidationVerdict, Validator,
};
use crate::analysis::{
    Draft, DraftSection, EvidenceItem, GapDescriptor, RetrievalQuery, SourceAttribution,
    SourceCategory,
};
use crate::error::{CollaboratorError, CollaboratorResult};

/// Section the scripted generator writes evidence into.
pub const FINDINGS_SECTION: &str = "findings";

fn injected(operation: &str) -> CollaboratorError {
    CollaboratorError::Failed {
        operation: operation.to_string(),
        message: "scripted failure".to_string(),
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Generates a fixed initial draft and appends evidence to [`FINDINGS_SECTION`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    fail_generate: bool,
    fail_refine: bool,
    generate_calls: AtomicU32,
    refine_calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }

    pub fn failing_refine(mut self) -> Self {
        self.fail_refine = true;
        self
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn refine_calls(&self) -> u32 {
        self.refine_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, query: &str, scope: Option<&str>) -> CollaboratorResult<Draft> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_generate {
            return Err(injected("generate"));
        }

        let subject = scope.unwrap_or("the subject");
        Ok(Draft::new(vec![
            DraftSection::new(
                "executive_summary",
                format!("Preliminary view on {}: {}", subject, query),
            ),
            DraftSection::new(FINDINGS_SECTION, "No evidence gathered yet."),
            DraftSection::new("recommendation", "Hold pending further research"),
            DraftSection::new("confidence_level", "Low"),
        ]))
    }

    async fn refine(&self, draft: &Draft, evidence: &[EvidenceItem]) -> CollaboratorResult<Draft> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refine {
            return Err(injected("refine"));
        }

        let additions: Vec<String> = evidence
            .iter()
            .map(|e| format!("- [{}] {}", e.source, e.content))
            .collect();

        let mut refined = draft.clone();
        refined.revision = draft.revision + 1;
        match refined
            .sections
            .iter_mut()
            .find(|s| s.name == FINDINGS_SECTION)
        {
            Some(section) => {
                section.content = format!("{}\n{}", section.content, additions.join("\n"));
            }
            None => refined
                .sections
                .push(DraftSection::new(FINDINGS_SECTION, additions.join("\n"))),
        }
        Ok(refined)
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Scores drafts by revision from a fixed script.
///
/// Revision `r` scores `scores[r]`, or the last entry once the script runs
/// out. Every evaluation reports `gaps_per_evaluation` gaps whose suggested
/// queries are unique to that revision.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    scores: Vec<f64>,
    gaps_per_evaluation: usize,
    fail_at_revision: Option<u32>,
    calls: AtomicU32,
}

impl ScriptedEvaluator {
    pub fn new(scores: Vec<f64>) -> Self {
        Self {
            scores,
            gaps_per_evaluation: 2,
            fail_at_revision: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Always return `score`.
    pub fn constant(score: f64) -> Self {
        Self::new(vec![score])
    }

    pub fn with_gaps_per_evaluation(mut self, gaps: usize) -> Self {
        self.gaps_per_evaluation = gaps;
        self
    }

    /// Fail when asked to evaluate the given revision.
    pub fn failing_at_revision(mut self, revision: u32) -> Self {
        self.fail_at_revision = Some(revision);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn score_for(&self, revision: u32) -> f64 {
        self.scores
            .get(revision as usize)
            .or_else(|| self.scores.last())
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        draft: &Draft,
        _query: &str,
        _scope: Option<&str>,
    ) -> CollaboratorResult<Evaluation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at_revision == Some(draft.revision) {
            return Err(injected("evaluate"));
        }

        let gaps = (0..self.gaps_per_evaluation)
            .map(|k| {
                GapDescriptor::new(
                    format!("Gap {} in revision {}", k, draft.revision),
                    1.0 - k as f64 * 0.1,
                )
                .with_queries([format!("revision {} gap {} data", draft.revision, k)])
            })
            .collect();

        Ok(Evaluation {
            score: self.score_for(draft.revision),
            gaps,
        })
    }
}

// ============================================================================
// Retriever
// ============================================================================

/// Behaviour of the scripted primary index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrievalScript {
    /// Answer every query with this confidence.
    Answer { confidence: f64 },
    /// Return empty content.
    Empty,
    /// Fail every call with a non-retryable error.
    Fail,
}

/// Pauses the retriever at a given call until released.
#[derive(Debug, Clone)]
pub struct RetrievalGate {
    /// 1-based call number that blocks.
    pub at_call: u32,
    /// Notified when the blocking call starts.
    pub reached: Arc<Notify>,
    /// Notify to let the blocking call continue.
    pub resume: Arc<Notify>,
}

impl RetrievalGate {
    pub fn at_call(at_call: u32) -> Self {
        Self {
            at_call,
            reached: Arc::new(Notify::new()),
            resume: Arc::new(Notify::new()),
        }
    }
}

/// Scripted primary index.
#[derive(Debug)]
pub struct ScriptedRetriever {
    script: RetrievalScript,
    delay: Option<Duration>,
    gate: Option<RetrievalGate>,
    calls: AtomicU32,
}

impl ScriptedRetriever {
    pub fn new(script: RetrievalScript) -> Self {
        Self {
            script,
            delay: None,
            gate: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Answer everything with confidence 0.9.
    pub fn answering() -> Self {
        Self::new(RetrievalScript::Answer { confidence: 0.9 })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: RetrievalGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> CollaboratorResult<RetrievalResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(gate) = self.gate.as_ref().filter(|g| g.at_call == call) {
            gate.reached.notify_one();
            gate.resume.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script {
            RetrievalScript::Answer { confidence } => Ok(RetrievalResponse {
                content: format!("Indexed answer for '{}'", query.text),
                confidence,
            }),
            RetrievalScript::Empty => Ok(RetrievalResponse {
                content: String::new(),
                confidence: 0.0,
            }),
            RetrievalScript::Fail => Err(injected("retrieve")),
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Behaviour of the scripted validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationScript {
    Pass,
    Reject,
    Fail,
}

/// Scripted validator.
#[derive(Debug)]
pub struct ScriptedValidator {
    script: ValidationScript,
    calls: AtomicU32,
}

impl ScriptedValidator {
    pub fn new(script: ValidationScript) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(
        &self,
        query: &RetrievalQuery,
        response: &RetrievalResponse,
    ) -> CollaboratorResult<ValidationVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            ValidationScript::Pass => Ok(ValidationVerdict {
                passed: true,
                reasoning: format!("Answer addresses '{}'", query.text),
                confidence: response.confidence,
            }),
            ValidationScript::Reject => Ok(ValidationVerdict {
                passed: false,
                reasoning: format!("Answer to '{}' is too vague", query.text),
                confidence: 0.4,
            }),
            ValidationScript::Fail => Err(injected("validate")),
        }
    }
}

// ============================================================================
// Fallback search
// ============================================================================

/// Behaviour of the scripted fallback search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackScript {
    /// Return specific, attributed content.
    Succeed,
    /// Return content without any source attribution.
    Unattributed,
    /// Fail every call.
    Unreachable,
}

/// Scripted fallback search over trusted sources.
#[derive(Debug)]
pub struct ScriptedFallback {
    script: FallbackScript,
    calls: AtomicU32,
}

impl ScriptedFallback {
    pub fn new(script: FallbackScript) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackSearcher for ScriptedFallback {
    async fn fallback_search(
        &self,
        query: &RetrievalQuery,
        allowed: &[SourceCategory],
    ) -> CollaboratorResult<FallbackResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = format!(
            "According to the FY2024 annual report, figures relevant to '{}' rose 12% to $1.4 billion in 2024, per the company's filing.",
            query.text
        );

        match self.script {
            FallbackScript::Succeed => Ok(FallbackResult {
                content,
                attribution: allowed
                    .first()
                    .map(|category| SourceAttribution {
                        category: *category,
                        source: "Company annual report".to_string(),
                        reference: Some("10-K FY2024".to_string()),
                    })
                    .into_iter()
                    .collect(),
                quality_indicators: None,
            }),
            FallbackScript::Unattributed => Ok(FallbackResult {
                content,
                attribution: Vec::new(),
                quality_indicators: None,
            }),
            FallbackScript::Unreachable => Err(CollaboratorError::Unavailable {
                operation: "fallback_search".to_string(),
                message: "scripted outage".to_string(),
                retries: 0,
            }),
        }
    }
}

// ============================================================================
// Offline bundle
// ============================================================================

/// Collaborators for a full run without network access.
///
/// Scores climb one point per revision from 5.0 and then hold at 8.0.
pub fn offline_collaborators() -> Collaborators {
    Collaborators {
        generator: Arc::new(ScriptedGenerator::new()),
        evaluator: Arc::new(ScriptedEvaluator::new(vec![5.0, 6.0, 7.0, 8.0])),
        retriever: Arc::new(ScriptedRetriever::answering()),
        validator: Arc::new(ScriptedValidator::new(ValidationScript::Pass)),
        fallback: Arc::new(ScriptedFallback::new(FallbackScript::Succeed)),
    }
}
