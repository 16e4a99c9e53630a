use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};
use crate::prompts::{
    EVALUATION_PROMPT, FALLBACK_SEARCH_PROMPT, GENERATION_PROMPT, RETRIEVAL_PROMPT,
    VALIDATION_PROMPT,
};

/// Client for interacting with Langbase Pipes API.
///
/// Each call is a single HTTP attempt. Retries and per-call deadlines are
/// applied by [`crate::collaborators::CallPolicy`].
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_ms: u64,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Run a pipe once.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let start = Instant::now();

        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(
                pipe = %request.name,
                status = status.as_u16(),
                latency_ms = start.elapsed().as_millis(),
                "Langbase pipe call rejected"
            );
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| LangbaseError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        debug!(
            pipe = %request.name,
            latency_ms = start.elapsed().as_millis(),
            total_tokens = pipe_response
                .raw
                .as_ref()
                .and_then(|r| r.usage.as_ref())
                .and_then(|u| u.total_tokens),
            "Langbase pipe call succeeded"
        );

        Ok(pipe_response)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(LangbaseError::Http)?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| LangbaseError::InvalidResponse {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure a JSON-mode pipe with the given system prompt exists.
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(true)
            .with_temperature(0.3)
            .with_max_tokens(3000)
            .with_messages(vec![Message::system(system_prompt)]);

        match self.create_pipe(request).await {
            Ok(_) => {
                info!(pipe = %pipe_name, "Pipe ready");
                Ok(())
            }
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure every analysis pipe exists.
    pub async fn ensure_analysis_pipes(&self, pipes: &PipeConfig) -> LangbaseResult<()> {
        let specs = [
            (&pipes.generation, "Drafts and refines investment analyses", GENERATION_PROMPT),
            (&pipes.evaluation, "Scores analysis completeness and lists gaps", EVALUATION_PROMPT),
            (&pipes.retrieval, "Answers queries from the financial document index", RETRIEVAL_PROMPT),
            (&pipes.validation, "Validates retrieved answers", VALIDATION_PROMPT),
            (&pipes.fallback, "Searches trusted financial sources", FALLBACK_SEARCH_PROMPT),
        ];

        for (name, description, prompt) in specs {
            self.ensure_pipe(name, description, prompt).await?;
        }
        Ok(())
    }
}
