//! OpenAI-compatible chat-completions client.
//!
//! The primary endpoint defaults to the GLM coding API; an optional
//! fallback endpoint (OpenRouter by default) is tried when the primary
//! fails. Callers that must not fail (insight synthesis, chat) treat any
//! error as "no LLM available" and fall back to rule-based output.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::AgentError;

pub const DEFAULT_ENDPOINT: &str = "https://api.z.ai/api/coding/paas/v4/chat/completions";
pub const DEFAULT_MODEL: &str = "glm-4.7";
pub const DEFAULT_FALLBACK_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_FALLBACK_MODEL: &str = "qwen/qwen-2.5-72b-instruct";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Something that turns chat messages into a completion.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Model name reported in traces.
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AgentError>;
}

/// LLM settings, usually read from the `[llm]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub fallback_api_key: Option<String>,
    pub fallback_endpoint: String,
    pub fallback_model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            fallback_api_key: None,
            fallback_endpoint: DEFAULT_FALLBACK_ENDPOINT.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            timeout_secs: 15,
            max_tokens: 200,
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        has_key(&self.api_key) || has_key(&self.fallback_api_key)
    }
}

fn has_key(key: &Option<String>) -> bool {
    key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false)
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    api_key: String,
    model: String,
}

/// reqwest-backed [`CompletionBackend`].
pub struct HttpCompletionClient {
    http: reqwest::Client,
    primary: Endpoint,
    fallback: Option<Endpoint>,
    timeout_secs: u64,
}

impl HttpCompletionClient {
    /// Build a client from config. `Ok(None)` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, AgentError> {
        let primary = config.api_key.as_ref().filter(|k| !k.trim().is_empty()).map(|key| Endpoint {
            url: config.endpoint.clone(),
            api_key: key.clone(),
            model: config.model.clone(),
        });
        let fallback = config
            .fallback_api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .map(|key| Endpoint {
                url: config.fallback_endpoint.clone(),
                api_key: key.clone(),
                model: config.fallback_model.clone(),
            });

        let (primary, fallback) = match (primary, fallback) {
            (Some(p), f) => (p, f),
            (None, Some(f)) => (f, None),
            (None, None) => return Ok(None),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        tracing::info!(
            endpoint = %primary.url,
            model = %primary.model,
            fallback = fallback.is_some(),
            "LLM client configured"
        );
        Ok(Some(Self { http, primary, fallback, timeout_secs: config.timeout_secs }))
    }

    async fn call(&self, endpoint: &Endpoint, request: &CompletionRequest) -> Result<String, AgentError> {
        let mut body = json!({
            "model": endpoint.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }

        let response = self
            .http
            .post(&endpoint.url)
            .bearer_auth(&endpoint.api_key)
            .header("X-Title", "Orbitr")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout(self.timeout_secs)
                } else {
                    AgentError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(300).collect();
            return Err(AgentError::Llm(format!("{} returned {status}: {snippet}", endpoint.url)));
        }

        let value: Value = response.json().await?;
        extract_content(&value).ok_or_else(|| AgentError::Parse("no content in completion response".into()))
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    fn model(&self) -> &str {
        &self.primary.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AgentError> {
        match self.call(&self.primary, request).await {
            Ok(content) => Ok(content),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(error = %e, fallback = %fallback.url, "Primary LLM failed, trying fallback");
                    self.call(fallback, request).await
                }
                None => Err(e),
            },
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Pull the completion text out of the response shapes providers use.
///
/// Checked in order: `choices[0].delta.content`, `choices[0].message.content`
/// (or a bare string message), `output`, `content`, `response`, `data`
/// (string or `content`/`response` inside), `result`.
pub fn extract_content(response: &Value) -> Option<String> {
    if let Some(choice) = response.get("choices").and_then(|c| c.get(0)) {
        if let Some(content) = non_empty_str(choice.get("delta").and_then(|d| d.get("content"))) {
            return Some(content);
        }
        match choice.get("message") {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(message) => {
                if let Some(content) = non_empty_str(message.get("content")) {
                    return Some(content);
                }
            }
            None => {}
        }
    }

    for key in ["output", "content", "response"] {
        if let Some(content) = non_empty_str(response.get(key)) {
            return Some(content);
        }
    }

    match response.get("data") {
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
        Some(data @ Value::Object(_)) => {
            if let Some(content) = non_empty_str(data.get("content")).or_else(|| non_empty_str(data.get("response"))) {
                return Some(content);
            }
        }
        _ => {}
    }

    match response.get("result") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_openai_shape() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(extract_content(&v).as_deref(), Some("hello"));
    }

    #[test]
    fn test_extract_delta_takes_precedence() {
        let v = json!({"choices": [{"delta": {"content": "partial"}, "message": {"content": "full"}}]});
        assert_eq!(extract_content(&v).as_deref(), Some("partial"));
    }

    #[test]
    fn test_extract_alternative_shapes() {
        assert_eq!(extract_content(&json!({"output": "o"})).as_deref(), Some("o"));
        assert_eq!(extract_content(&json!({"data": {"response": "d"}})).as_deref(), Some("d"));
        assert_eq!(extract_content(&json!({"data": "raw"})).as_deref(), Some("raw"));
        assert_eq!(extract_content(&json!({"result": 42})).as_deref(), Some("42"));
        assert_eq!(extract_content(&json!({"choices": [{"message": {"content": ""}}]})), None);
        assert_eq!(extract_content(&json!({})), None);
    }

    #[test]
    fn test_client_requires_a_key() {
        let config = LlmConfig::default();
        assert!(!config.is_enabled());
        assert!(HttpCompletionClient::from_config(&config).unwrap().is_none());

        let config = LlmConfig { fallback_api_key: Some("or-key".into()), ..LlmConfig::default() };
        let client = HttpCompletionClient::from_config(&config).unwrap().expect("fallback-only client");
        assert_eq!(client.model(), DEFAULT_FALLBACK_MODEL, "fallback should be promoted to primary");
    }
}
