use serde::{Deserialize, Serialize};

use crate::analysis::{
    Draft, DraftSection, GapDescriptor, QualityIndicators, SourceAttribution, SourceCategory,
};

/// Message in a Langbase conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request to run a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    /// Pipe name (required by Langbase API)
    pub name: String,
    pub messages: Vec<Message>,
    /// Streaming is always off; callers need the whole completion to parse it.
    #[serde(default)]
    pub stream: bool,
}

impl PipeRequest {
    /// Create a new pipe request with name and messages
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
        }
    }
}

/// Response from a Langbase pipe
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    pub success: bool,
    pub completion: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub raw: Option<RawResponse>,
}

/// Raw model response details
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Request to create (or upsert) a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct CreatePipeRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// Response from creating a pipe
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePipeResponse {
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub url: String,
}

impl CreatePipeRequest {
    /// Create a new pipe request with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: None,
            upsert: None,
            json: None,
            temperature: None,
            max_tokens: None,
            messages: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set model (e.g., "openai:gpt-4o-mini")
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable upsert (update if exists)
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    /// Enable JSON output mode
    pub fn with_json_output(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set system/user messages
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }
}

// ============================================================================
// Structured pipe completions
// ============================================================================

/// Locate the JSON payload in a completion.
///
/// Accepts raw JSON or JSON wrapped in a fenced code block.
pub fn extract_json(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    let fenced = if completion.contains("```json") {
        completion.split("```json").nth(1)
    } else if completion.contains("```") {
        completion.split("```").nth(1)
    } else {
        None
    };

    match fenced {
        Some(block) => block
            .split("```")
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found fenced block but it was empty".to_string()),
        None => Err(format!(
            "No JSON found in completion. First 100 chars: '{}'",
            completion.chars().take(100).collect::<String>()
        )),
    }
}

/// Parse a completion into `T`, tolerating code fences.
pub fn parse_completion<T: serde::de::DeserializeOwned>(completion: &str) -> Result<T, String> {
    let json = extract_json(completion)?;
    serde_json::from_str(json).map_err(|e| format!("Failed to parse completion: {}", e))
}

/// Generation pipe output
#[derive(Debug, Clone, Deserialize)]
pub struct DraftResponse {
    pub sections: Vec<DraftSection>,
}

impl DraftResponse {
    /// Draft at the given revision.
    pub fn into_draft(self, revision: u32) -> Draft {
        Draft {
            revision,
            sections: self
                .sections
                .into_iter()
                .filter(|s| !s.name.trim().is_empty())
                .collect(),
        }
    }
}

/// Evaluation pipe output
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationResponse {
    pub completeness_score: f64,
    #[serde(default)]
    pub gaps: Vec<GapResponse>,
}

/// A gap as reported by the evaluation pipe
#[derive(Debug, Clone, Deserialize)]
pub struct GapResponse {
    pub description: String,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub suggested_queries: Vec<String>,
}

impl EvaluationResponse {
    /// Gaps in reported order; missing priorities decrease with position.
    pub fn gap_descriptors(&self) -> Vec<GapDescriptor> {
        let count = self.gaps.len() as f64;
        self.gaps
            .iter()
            .enumerate()
            .map(|(i, gap)| GapDescriptor {
                description: gap.description.clone(),
                priority: gap
                    .priority
                    .unwrap_or_else(|| (count - i as f64) / count.max(1.0)),
                suggested_queries: gap.suggested_queries.clone(),
            })
            .collect()
    }
}

/// Retrieval pipe output
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalPipeResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Validation pipe output
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationResponse {
    pub validation_passed: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence_score: f64,
}

/// Fallback search pipe output
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceResponse>,
    #[serde(default)]
    pub quality_indicators: Option<QualityIndicators>,
}

/// A cited source in a fallback answer
#[derive(Debug, Clone, Deserialize)]
pub struct SourceResponse {
    pub category: String,
    pub source: String,
    #[serde(default)]
    pub reference: Option<String>,
}

impl FallbackResponse {
    /// Attributions whose category parses and is in `allowed`.
    pub fn attributions(&self, allowed: &[SourceCategory]) -> Vec<SourceAttribution> {
        self.sources
            .iter()
            .filter(|s| !s.source.trim().is_empty())
            .filter_map(|s| {
                let category = s.category.parse::<SourceCategory>().ok()?;
                allowed.contains(&category).then(|| SourceAttribution {
                    category,
                    source: s.source.clone(),
                    reference: s.reference.clone(),
                })
            })
            .collect()
    }
}
