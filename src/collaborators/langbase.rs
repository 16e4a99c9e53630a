use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    Evaluation, Evaluator, FallbackResult, FallbackSearcher, Generator, RetrievalResponse,
    Retriever, ValidationVerdict, Validator,
};
use crate::analysis::{Draft, EvidenceItem, RetrievalQuery, SourceCategory};
use crate::config::PipeConfig;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::langbase::{
    parse_completion, DraftResponse, EvaluationResponse, FallbackResponse, LangbaseClient,
    Message, PipeRequest, RetrievalPipeResponse, ValidationResponse,
};
use crate::prompts::{
    trusted_sources_block, EVALUATION_PROMPT, FALLBACK_SEARCH_PROMPT, GENERATION_PROMPT,
    RETRIEVAL_PROMPT, VALIDATION_PROMPT,
};

/// All five collaborator roles backed by Langbase pipes.
#[derive(Clone)]
pub struct LangbaseCollaborators {
    client: LangbaseClient,
    pipes: PipeConfig,
}

impl LangbaseCollaborators {
    pub fn new(client: LangbaseClient, pipes: PipeConfig) -> Self {
        Self { client, pipes }
    }

    /// Run `pipe` and parse its completion as `T`.
    async fn run<T: DeserializeOwned>(
        &self,
        operation: &str,
        pipe: &str,
        system_prompt: &str,
        user_message: String,
    ) -> CollaboratorResult<T> {
        let request = PipeRequest::new(
            pipe,
            vec![Message::system(system_prompt), Message::user(user_message)],
        );

        let response = self
            .client
            .call_pipe(request)
            .await
            .map_err(|e| CollaboratorError::from_langbase(operation, e))?;

        debug!(
            operation = %operation,
            pipe = %pipe,
            completion_len = response.completion.len(),
            "Pipe completion received"
        );

        parse_completion(&response.completion).map_err(|message| {
            CollaboratorError::InvalidResponse {
                operation: operation.to_string(),
                message,
            }
        })
    }
}

fn scope_line(scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("\nScope: {}", scope),
        None => String::new(),
    }
}

fn render_evidence(evidence: &[EvidenceItem]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut line = format!(
                "{}. [{} | confidence {:.2}{}] Q: {}\n{}",
                i + 1,
                item.source,
                item.confidence,
                if item.low_confidence {
                    " | LOW CONFIDENCE"
                } else {
                    ""
                },
                item.query.text,
                item.content
            );
            if !item.attribution.is_empty() {
                let sources: Vec<String> = item
                    .attribution
                    .iter()
                    .map(|a| format!("{} ({})", a.source, a.category))
                    .collect();
                line.push_str(&format!("\nSources: {}", sources.join("; ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Generator for LangbaseCollaborators {
    async fn generate(&self, query: &str, scope: Option<&str>) -> CollaboratorResult<Draft> {
        let message = format!(
            "Write an initial investment analysis.\n\nQuestion: {}{}",
            query,
            scope_line(scope)
        );
        let response: DraftResponse = self
            .run("generate", &self.pipes.generation, GENERATION_PROMPT, message)
            .await?;
        Ok(response.into_draft(0))
    }

    async fn refine(&self, draft: &Draft, evidence: &[EvidenceItem]) -> CollaboratorResult<Draft> {
        let message = format!(
            "Refine this analysis with the new evidence.\n\nCurrent analysis:\n{}\n\nNew evidence (most reliable first):\n{}",
            draft.render(),
            render_evidence(evidence)
        );
        let response: DraftResponse = self
            .run("refine", &self.pipes.generation, GENERATION_PROMPT, message)
            .await?;
        Ok(response.into_draft(draft.revision + 1))
    }
}

#[async_trait]
impl Evaluator for LangbaseCollaborators {
    async fn evaluate(
        &self,
        draft: &Draft,
        query: &str,
        scope: Option<&str>,
    ) -> CollaboratorResult<Evaluation> {
        let message = format!(
            "Original question: {}{}\n\nAnalysis to review:\n{}",
            query,
            scope_line(scope),
            draft.render()
        );
        let response: EvaluationResponse = self
            .run("evaluate", &self.pipes.evaluation, EVALUATION_PROMPT, message)
            .await?;
        Ok(Evaluation {
            score: response.completeness_score,
            gaps: response.gap_descriptors(),
        })
    }
}

#[async_trait]
impl Retriever for LangbaseCollaborators {
    async fn retrieve(&self, query: &RetrievalQuery) -> CollaboratorResult<RetrievalResponse> {
        let message = format!("Question: {}{}", query.text, scope_line(query.scope_hint.as_deref()));
        let response: RetrievalPipeResponse = self
            .run("retrieve", &self.pipes.retrieval, RETRIEVAL_PROMPT, message)
            .await?;
        Ok(RetrievalResponse {
            content: response.content,
            confidence: response.confidence.clamp(0.0, 1.0),
        })
    }
}

#[async_trait]
impl Validator for LangbaseCollaborators {
    async fn validate(
        &self,
        query: &RetrievalQuery,
        response: &RetrievalResponse,
    ) -> CollaboratorResult<ValidationVerdict> {
        let message = format!(
            "Question: {}\n\nRetrieved answer (retriever confidence {:.2}):\n{}",
            query.text, response.confidence, response.content
        );
        let verdict: ValidationResponse = self
            .run("validate", &self.pipes.validation, VALIDATION_PROMPT, message)
            .await?;
        Ok(ValidationVerdict {
            passed: verdict.validation_passed,
            reasoning: verdict.reasoning,
            confidence: verdict.confidence_score.clamp(0.0, 1.0),
        })
    }
}

#[async_trait]
impl FallbackSearcher for LangbaseCollaborators {
    async fn fallback_search(
        &self,
        query: &RetrievalQuery,
        allowed: &[SourceCategory],
    ) -> CollaboratorResult<FallbackResult> {
        let message = format!(
            "Question: {}{}\n\nAllowed source categories:\n{}",
            query.text,
            scope_line(query.scope_hint.as_deref()),
            trusted_sources_block(allowed)
        );
        let response: FallbackResponse = self
            .run("fallback_search", &self.pipes.fallback, FALLBACK_SEARCH_PROMPT, message)
            .await?;
        Ok(FallbackResult {
            attribution: response.attributions(allowed),
            content: response.content,
            quality_indicators: response.quality_indicators,
        })
    }
}
