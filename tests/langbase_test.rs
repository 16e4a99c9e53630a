//! Integration tests for the Langbase client and Langbase-backed collaborators
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_iterative_analysis::analysis::{
    AnalysisEngine, Draft, DraftSection, EvidenceSource, RetrievalQuery, SourceCategory,
    TerminationReason,
};
use mcp_iterative_analysis::collaborators::{
    Collaborators, Evaluator, FallbackSearcher, Generator, LangbaseCollaborators,
    RetrievalResponse, Retriever, Validator,
};
use mcp_iterative_analysis::config::{AnalysisConfig, LangbaseConfig, PipeConfig, RequestConfig};
use mcp_iterative_analysis::error::{CollaboratorError, LangbaseError};
use mcp_iterative_analysis::langbase::{LangbaseClient, Message, PipeRequest};
use mcp_iterative_analysis::storage::MemoryStorage;

fn request_config() -> RequestConfig {
    RequestConfig {
        timeout_ms: 5000,
        max_retries: 0, // No retries for testing
        retry_delay_ms: 10,
    }
}

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    LangbaseClient::new(&config, request_config()).expect("Failed to create client")
}

fn collaborators(base_url: &str) -> LangbaseCollaborators {
    LangbaseCollaborators::new(create_test_client(base_url), PipeConfig::default())
}

/// A successful pipe run whose completion is `body` serialized as JSON.
fn completion(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "completion": body.to_string(),
        "threadId": "thread-123",
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        }
    }))
}

fn pipe(name: &str) -> wiremock::matchers::BodyPartialJsonMatcher {
    body_partial_json(json!({ "name": name }))
}

#[cfg(test)]
mod pipe_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .respond_with(completion(json!({"content": "ok", "confidence": 0.5})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let response = client
            .call_pipe(PipeRequest::new("test-pipe", vec![Message::user("hello")]))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.thread_id.as_deref(), Some("thread-123"));
        assert!(response.completion.contains("confidence"));
    }

    #[tokio::test]
    async fn test_pipe_call_sends_name_and_messages() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({
                "name": "test-pipe",
                "stream": false,
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}]
            })))
            .respond_with(completion(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = PipeRequest::new(
            "test-pipe",
            vec![Message::system("be brief"), Message::user("hi")],
        );
        assert!(client.call_pipe(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_pipe_call_api_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .call_pipe(PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();

        match err {
            LangbaseError::Api { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .call_pipe(PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                completion(json!({})).set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let config = LangbaseConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_server.uri(),
        };
        let client = LangbaseClient::new(
            &config,
            RequestConfig {
                timeout_ms: 50,
                max_retries: 0,
                retry_delay_ms: 0,
            },
        )
        .unwrap();

        let err = client
            .call_pipe(PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::Timeout { timeout_ms: 50 }));
    }
}

#[cfg(test)]
mod pipe_setup_tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_analysis_pipes_creates_all_five() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .and(body_partial_json(json!({"upsert": true, "json": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "pipe",
                "description": null,
                "status": "public",
                "url": "https://langbase.com/pipe"
            })))
            .expect(5)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        client
            .ensure_analysis_pipes(&PipeConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_pipe_tolerates_conflict() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        assert!(client
            .ensure_pipe("analysis-evaluation-v1", "critic", "prompt")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_ensure_pipe_propagates_auth_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .ensure_pipe("analysis-evaluation-v1", "critic", "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::Api { status: 401, .. }));
    }
}

#[cfg(test)]
mod collaborator_tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_parses_sections() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-generation-v1"))
            .respond_with(completion(json!({
                "sections": [
                    {"name": "executive_summary", "content": "ACME looks stable."},
                    {"name": "  ", "content": "dropped"},
                    {"name": "recommendation", "content": "Hold"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let draft = collaborators(&mock_server.uri())
            .generate("Is ACME a buy?", Some("ACME"))
            .await
            .unwrap();

        assert_eq!(draft.revision, 0);
        assert_eq!(draft.sections.len(), 2);
        assert_eq!(draft.section("recommendation").unwrap().content, "Hold");
    }

    #[tokio::test]
    async fn test_refine_bumps_revision() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-generation-v1"))
            .respond_with(completion(json!({
                "sections": [{"name": "findings", "content": "Margins rose."}]
            })))
            .mount(&mock_server)
            .await;

        let draft = Draft {
            revision: 3,
            sections: vec![DraftSection::new("findings", "None yet.")],
        };
        let refined = collaborators(&mock_server.uri())
            .refine(&draft, &[])
            .await
            .unwrap();
        assert_eq!(refined.revision, 4);
    }

    #[tokio::test]
    async fn test_evaluate_accepts_fenced_json() {
        let mock_server = MockServer::start().await;

        let fenced = "```json\n{\"completeness_score\": 6.5, \"gaps\": [{\"description\": \"No debt data\", \"suggested_queries\": [\"ACME debt 2024\"]}]}\n```";
        Mock::given(method("POST"))
            .and(pipe("analysis-evaluation-v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": fenced,
                "threadId": null,
                "raw": null
            })))
            .mount(&mock_server)
            .await;

        let evaluation = collaborators(&mock_server.uri())
            .evaluate(&Draft::default(), "Is ACME a buy?", None)
            .await
            .unwrap();

        assert_eq!(evaluation.score, 6.5);
        assert_eq!(evaluation.gaps.len(), 1);
        assert_eq!(evaluation.gaps[0].suggested_queries, vec!["ACME debt 2024"]);
    }

    #[tokio::test]
    async fn test_unparseable_completion_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-evaluation-v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "completion": "I think it is pretty good.",
                "threadId": null,
                "raw": null
            })))
            .mount(&mock_server)
            .await;

        let err = collaborators(&mock_server.uri())
            .evaluate(&Draft::default(), "Is ACME a buy?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidResponse { ref operation, .. } if operation == "evaluate"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-retrieval-v1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&mock_server)
            .await;

        let err = collaborators(&mock_server.uri())
            .retrieve(&RetrievalQuery::new("acme revenue", None))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_retrieve_and_validate_clamp_confidence() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-retrieval-v1"))
            .respond_with(completion(json!({"content": "Revenue $4.2B", "confidence": 1.7})))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(pipe("analysis-validation-v1"))
            .respond_with(completion(json!({
                "validation_passed": true,
                "reasoning": "Matches filings",
                "confidence_score": -0.2
            })))
            .mount(&mock_server)
            .await;

        let backend = collaborators(&mock_server.uri());
        let query = RetrievalQuery::new("ACME revenue 2024", None);
        let response = backend.retrieve(&query).await.unwrap();
        assert_eq!(response.confidence, 1.0);

        let verdict = backend
            .validate(
                &query,
                &RetrievalResponse {
                    content: response.content,
                    confidence: response.confidence,
                },
            )
            .await
            .unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_fallback_keeps_only_allowed_sources() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-fallback-search-v1"))
            .respond_with(completion(json!({
                "content": "ACME's 10-K shows revenue of $4.2B in 2024.",
                "sources": [
                    {"category": "regulatory_filings", "source": "ACME 10-K", "reference": "FY2024"},
                    {"category": "rating_agency", "source": "Moody's"},
                    {"category": "blog", "source": "Some blog"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let result = collaborators(&mock_server.uri())
            .fallback_search(
                &RetrievalQuery::new("acme revenue", None),
                &[SourceCategory::RegulatoryFilings],
            )
            .await
            .unwrap();

        assert_eq!(result.attribution.len(), 1);
        assert_eq!(result.attribution[0].source, "ACME 10-K");
        assert!(result.quality_indicators.is_none());
    }
}

#[cfg(test)]
mod engine_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_run_against_langbase_pipes() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(pipe("analysis-generation-v1"))
            .respond_with(completion(json!({
                "sections": [
                    {"name": "executive_summary", "content": "Initial view."},
                    {"name": "recommendation", "content": "Hold"},
                    {"name": "confidence_level", "content": "Medium"}
                ]
            })))
            .mount(&mock_server)
            .await;
        // First evaluation finds a gap, the second passes.
        Mock::given(method("POST"))
            .and(pipe("analysis-evaluation-v1"))
            .respond_with(completion(json!({
                "completeness_score": 5.0,
                "gaps": [{"description": "No revenue data", "priority": 0.9,
                          "suggested_queries": ["ACME revenue 2024"]}]
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(pipe("analysis-evaluation-v1"))
            .respond_with(completion(json!({"completeness_score": 8.0, "gaps": []})))
            .with_priority(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(pipe("analysis-retrieval-v1"))
            .respond_with(completion(json!({"content": "Revenue was $4.2B", "confidence": 0.8})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(pipe("analysis-validation-v1"))
            .respond_with(completion(json!({
                "validation_passed": true,
                "reasoning": "Consistent",
                "confidence_score": 0.85
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = Arc::new(collaborators(&mock_server.uri()));
        let engine = AnalysisEngine::new(
            Collaborators::uniform(backend),
            Arc::new(MemoryStorage::new()),
            &request_config(),
            AnalysisConfig::default(),
        );

        let export = engine
            .run_to_completion("Is ACME Corp a good long-term investment?", Some("ACME"))
            .await
            .unwrap();

        assert_eq!(export.termination_reason, TerminationReason::QualityMet);
        assert_eq!(export.stats.score_trajectory, vec![5.0, 8.0]);
        assert_eq!(export.iterations[0].queries[0].text, "acme revenue 2024");
        assert_eq!(export.iterations[0].evidence[0].source, EvidenceSource::PrimaryIndex);
        assert_eq!(export.final_recommendation.as_deref(), Some("Hold"));
        assert_eq!(export.confidence_level.as_deref(), Some("Medium"));
    }
}
