//! Model endpoint abstraction and the OpenAI-compatible HTTP implementation.
//!
//! Epistemic foundation:
//! - K_i: OpenAI API schema is the de facto standard
//! - K_i: Aggregators (OpenRouter) and on-prem (vLLM, Ollama) all support it
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will carry a message (might not)
//!
//! One `send` is exactly one HTTP attempt. Retrying is the executor's job.

use crate::client::Credential;
use crate::models::{CallError, EndpointConfig, PipelineError, expand_headers};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Expected reply shape, sent as `response_format` when supported.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplySchema {
    pub name: String,
    pub schema: Value,
}

/// One logical request: the same payload is replayed on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub schema: Option<ReplySchema>,
}

impl CallRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            schema: None,
        }
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.schema = Some(ReplySchema {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn with_limits(mut self, max_tokens: Option<u32>, temperature: Option<f64>) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// A chat-completion style model server.
///
/// Implementations make exactly one attempt per call and report the
/// outcome as text or a classified `CallError`.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Endpoint name (for logging).
    fn name(&self) -> &str;

    /// Perform one attempt with `credential`.
    async fn send(&self, credential: &Credential, request: &CallRequest) -> Result<String, CallError>;

    /// Prompt and completion tokens reported so far.
    fn token_usage(&self) -> (u64, u64) {
        (0, 0)
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP endpoint for any OpenAI-compatible server.
///
/// Supports:
/// - OpenRouter, Together AI, Fireworks, Groq (aggregators)
/// - vLLM, TGI, Ollama, llama.cpp (on-prem)
pub struct ChatEndpoint {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// Base URL for the API
    base_url: String,
    /// Custom headers to include in requests
    custom_headers: HashMap<String, String>,
    /// Per-attempt timeout
    timeout: Duration,
    /// Whether to send `response_format`
    structured_output: bool,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl ChatEndpoint {
    /// Create a new endpoint from its configuration.
    pub fn new(name: impl Into<String>, config: &EndpointConfig) -> Result<Self, PipelineError> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            name: name.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            custom_headers: expand_headers(&config.headers),
            timeout,
            structured_output: config.structured_output,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self, credential: &Credential) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if !credential.is_anonymous() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", credential.expose())) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, value) in &self.custom_headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        headers
    }

    fn response_format(&self, request: &CallRequest) -> Option<Value> {
        if !self.structured_output {
            return None;
        }
        request.schema.as_ref().map(|s| {
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": s.name,
                    "schema": s.schema,
                    "strict": true,
                }
            })
        })
    }
}

#[async_trait]
impl ModelEndpoint for ChatEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn token_usage(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    async fn send(&self, credential: &Credential, request: &CallRequest) -> Result<String, CallError> {
        let payload = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: self.response_format(request),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers(credential))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::Timeout(self.timeout)
                } else {
                    CallError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(CallError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Timeout(self.timeout)
            } else {
                CallError::Unusable(format!("Failed to parse response: {e}"))
            }
        })?;

        if let Some(usage) = &body.usage {
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        }

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CallError::Unusable("No text in response choices".to_string()))?;

        debug!(
            endpoint = %self.name,
            model = %request.model,
            chars = content.len(),
            "Completion received"
        );

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(structured_output: bool) -> ChatEndpoint {
        let config = EndpointConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            structured_output,
            ..EndpointConfig::default()
        };
        ChatEndpoint::new("local", &config).unwrap()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(endpoint(true).base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_response_format_follows_flag() {
        let request = CallRequest::new("m", vec![Message::user("hi")])
            .with_schema("review", json!({"type": "object"}));
        let format = endpoint(true).response_format(&request).unwrap();
        assert_eq!(format["json_schema"]["name"], json!("review"));
        assert!(endpoint(false).response_format(&request).is_none());

        let plain = CallRequest::new("m", vec![Message::user("hi")]);
        assert!(endpoint(true).response_format(&plain).is_none());
    }

    #[test]
    fn test_anonymous_credential_sends_no_auth() {
        let anonymous = Credential::new(secrecy::SecretString::from(String::new()));
        assert!(endpoint(true).headers(&anonymous).get(AUTHORIZATION).is_none());

        let keyed = Credential::new(secrecy::SecretString::from("sk-1".to_string()));
        let headers = endpoint(true).headers(&keyed);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-1");
    }

    #[test]
    fn test_request_payload_omits_unset_limits() {
        let messages = vec![Message::user("hi")];
        let payload = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            max_tokens: None,
            temperature: Some(0.2),
            response_format: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("max_tokens").is_none());
        assert_eq!(value["temperature"], json!(0.2));
    }
}
