//! Reasoning engine access using an OpenAI-compatible Responses API
//!
//! The pipeline only sees the `ReasoningEngine` trait; `OpenAiEngine` is the
//! HTTP implementation used in production.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::AskConfig;
use crate::error::{EngineError, PipelineError};

/// One generation request
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// The input text/prompt
    pub input: String,
    /// Optional system instructions
    pub instructions: Option<String>,
    /// Ask the engine for a single strict JSON object
    pub json: bool,
    /// Opaque effort hint forwarded to the engine
    pub reasoning_effort: Option<String>,
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<String, EngineError>;
}

/// One engine call bounded by `timeout_secs`. Expiry is reported as `EngineError::Timeout`.
pub async fn generate_within(
    engine: &dyn ReasoningEngine,
    request: &LlmRequest,
    timeout_secs: u64,
) -> Result<String, EngineError> {
    match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), engine.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(timeout_secs)),
    }
}

// ============================================================================
// Responses API
// ============================================================================

/// Request body for the Responses API (internal)
#[derive(Serialize)]
struct ResponsesApiRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningOptions<'a>>,
}

#[derive(Serialize)]
struct TextOptions {
    format: TextFormat,
}

#[derive(Serialize)]
struct TextFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ReasoningOptions<'a> {
    effort: &'a str,
}

/// Response from the Responses API
#[derive(Deserialize, Debug)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Deserialize, Debug)]
struct ContentItem {
    #[serde(default)]
    text: Option<String>,
}

pub struct OpenAiEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiEngine {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &AskConfig) -> Result<Self, PipelineError> {
        let api_key = config.llm_api_key.clone().ok_or_else(|| {
            PipelineError::Configuration("no reasoning engine credentials configured".to_string())
        })?;
        Ok(Self::new(&config.llm_base_url, &config.llm_model, api_key))
    }
}

fn classify_status(status: u16, body: String) -> EngineError {
    match status {
        429 => EngineError::RateLimited,
        401 | 403 => EngineError::Unauthorized(status),
        _ => EngineError::Http { status, body },
    }
}

#[async_trait]
impl ReasoningEngine for OpenAiEngine {
    async fn generate(&self, request: &LlmRequest) -> Result<String, EngineError> {
        let body = ResponsesApiRequest {
            model: &self.model,
            input: &request.input,
            instructions: request.instructions.as_deref(),
            text: request.json.then(|| TextOptions {
                format: TextFormat { kind: "json_object" },
            }),
            reasoning: request
                .reasoning_effort
                .as_deref()
                .map(|effort| ReasoningOptions { effort }),
        };

        tracing::debug!("Calling reasoning engine at {}/responses", self.base_url);

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let resp: ResponsesApiResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Malformed(format!("Failed to parse response: {}", e)))?;

        extract_text_from_response(&resp)
    }
}

/// Joined message text, or `output_text` when the output items carry none
fn extract_text_from_response(resp: &ResponsesApiResponse) -> Result<String, EngineError> {
    let content: Vec<&str> = resp
        .output
        .iter()
        .flat_map(|item| item.content.iter())
        .filter_map(|c| c.text.as_deref())
        .collect();

    let text = if content.is_empty() {
        resp.output_text.clone().unwrap_or_default()
    } else {
        content.join("\n")
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(EngineError::Malformed("response carried no text".to_string()));
    }
    Ok(text.to_string())
}

// ============================================================================
// JSON Recovery
// ============================================================================

/// First JSON object in model output that deserializes as `T`.
///
/// Models wrap JSON in prose or code fences, so every `{` is tried as a start.
pub fn parse_json_from_text<T: DeserializeOwned>(text: &str) -> Result<T, EngineError> {
    let mut last_error = None;
    for (start, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<T>();
        match values.next() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => {
                last_error.get_or_insert(e);
            }
            None => {}
        }
    }

    Err(EngineError::Malformed(match last_error {
        Some(e) => format!("unusable JSON in output: {}", e),
        None => "no JSON object in output".to_string(),
    }))
}
