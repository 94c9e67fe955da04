//! LLM client for Look-Up enrichment.
//!
//! Wraps the profile's LLM adapter with mandatory pre-flight token
//! accounting and response normalization: the client never hands an
//! unparseable string to the executor.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;

use super::error::LookupError;

/// Tokens reserved for the LLM response output
pub const RESERVED_OUTPUT_TOKENS: usize = 2048;
/// Default context window if the model's limit is unknown
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Known context-window limits per model family, longest prefix wins.
static CONTEXT_WINDOWS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4-32k", 32_768),
        ("gpt-4", 8_192),
        ("gpt-3.5-turbo-16k", 16_384),
        ("gpt-3.5-turbo", 16_385),
        ("o1", 200_000),
        ("o3", 200_000),
        ("claude-3", 200_000),
        ("claude-sonnet", 200_000),
        ("claude-opus", 200_000),
        ("gemini-1.5", 1_048_576),
        ("mistral-large", 128_000),
        ("deepseek", 65_536),
    ])
});

/// Context-window limit for a model, defaulting when unknown.
pub fn context_window_for(model: &str) -> usize {
    CONTEXT_WINDOWS
        .iter()
        .filter(|(prefix, _)| model.starts_with(*prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Rough token estimate used when no tokenizer is available: ~4 chars/token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

// ============================================================================
// LLM Configuration (per template)
// ============================================================================

/// Per-template LLM configuration parsed from `llm_config` JSON.
/// Unrecognized keys pass through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LlmConfig {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or("unknown")
    }

    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }
}

/// Validate a template's `llm_config`: it must carry `adapter_id` or both
/// `provider` and `model`.
pub fn validate_llm_config(value: &Value) -> Result<(), LookupError> {
    let has_adapter_id = value.get("adapter_id").and_then(Value::as_str).is_some();
    let has_legacy = value.get("provider").and_then(Value::as_str).is_some()
        && value.get("model").and_then(Value::as_str).is_some();

    if !has_adapter_id && !has_legacy {
        return Err(LookupError::InvalidTemplate(
            "llm_config must contain either 'adapter_id' (recommended) \
             or both 'provider' and 'model' fields"
                .to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Adapter Trait
// ============================================================================

/// LLM adapter seam: one completion call plus token utilities.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Dispatch one completion request, returning the raw response text.
    async fn complete(
        &self,
        prompt: &str,
        config: &LlmConfig,
        timeout: Duration,
    ) -> Result<String, LookupError>;

    /// Exact token count when a tokenizer is available for the model.
    fn count_tokens(&self, _model: &str, _text: &str) -> Option<usize> {
        None
    }

    /// Maximum tokens the model can handle.
    fn context_limit(&self, model: &str) -> usize {
        context_window_for(model)
    }
}

// ============================================================================
// OpenAI-compatible HTTP Adapter
// ============================================================================

/// HTTP adapter for OpenAI-compatible chat-completion APIs.
pub struct OpenAiCompatAdapter {
    http_client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiCompatAdapter {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, api_base: api_base.into(), api_key }
    }
}

#[async_trait]
impl LlmAdapter for OpenAiCompatAdapter {
    async fn complete(
        &self,
        prompt: &str,
        config: &LlmConfig,
        timeout: Duration,
    ) -> Result<String, LookupError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| LookupError::Llm("API key not configured".to_string()))?;

        let chat_request = ChatCompletionRequest {
            model: config.model_name().to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        tracing::debug!("Calling LLM API: {} with model {}", url, config.model_name());

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LookupError::LlmTimeout(timeout.as_secs())
                } else {
                    LookupError::Llm(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LookupError::Llm(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Llm(format!("Malformed API response: {}", e)))?;

        chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LookupError::Llm("Empty response from LLM".to_string()))
    }
}

// ============================================================================
// LLM Client
// ============================================================================

/// LLM client: token pre-flight, single dispatch, response normalization.
pub struct LlmClient {
    adapter: std::sync::Arc<dyn LlmAdapter>,
    request_timeout: Duration,
}

impl LlmClient {
    pub fn new(adapter: std::sync::Arc<dyn LlmAdapter>, request_timeout: Duration) -> Self {
        Self { adapter, request_timeout }
    }

    /// Verify the prompt fits the model's context window before dispatching.
    ///
    /// The reserved output tokens are subtracted from the model limit; the
    /// error carries the available (post-reservation) limit.
    pub fn validate_context_size(&self, prompt: &str, model: &str) -> Result<(), LookupError> {
        let token_count = self
            .adapter
            .count_tokens(model, prompt)
            .unwrap_or_else(|| estimate_tokens(prompt));

        let available = self
            .adapter
            .context_limit(model)
            .saturating_sub(RESERVED_OUTPUT_TOKENS);

        tracing::debug!(
            "Context validation: {} tokens in prompt, {} available (model: {})",
            token_count,
            available,
            model
        );

        if token_count > available {
            return Err(LookupError::ContextWindowExceeded {
                token_count,
                context_limit: available,
                model: model.to_string(),
            });
        }
        Ok(())
    }

    /// Generate an enrichment response for the resolved prompt.
    ///
    /// Fails fast on context overflow without dispatching. The returned text
    /// always parses as a JSON object: chat noise around an embedded object
    /// is stripped, and an unrecoverable response is replaced by a synthetic
    /// low-confidence object.
    pub async fn generate(&self, prompt: &str, config: &LlmConfig) -> Result<String, LookupError> {
        self.validate_context_size(prompt, config.model_name())?;

        tracing::debug!("Calling LLM with prompt length: {}", prompt.len());
        let response_text = self
            .adapter
            .complete(prompt, config, self.request_timeout)
            .await?;

        match serde_json::from_str::<Value>(&response_text) {
            Ok(Value::Object(_)) => Ok(response_text),
            _ => Ok(extract_json(&response_text)),
        }
    }
}

/// Extract a JSON object from a chat-noise response; fall back to a
/// synthetic low-confidence object when none is found.
fn extract_json(response: &str) -> String {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && end > start
    {
        let candidate = &response[start..=end];
        if matches!(serde_json::from_str::<Value>(candidate), Ok(Value::Object(_))) {
            return candidate.to_string();
        }
    }

    tracing::warn!(
        "Could not extract JSON from response: {}",
        response.chars().take(200).collect::<String>()
    );
    json!({
        "raw_response": response.chars().take(500).collect::<String>(),
        "confidence": 0.3,
        "warning": "Could not extract structured data from LLM response",
    })
    .to_string()
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
