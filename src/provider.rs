//! Provider client — chat requests against an LLM text-generation API.
//!
//! The batch engine talks to providers through the [`ChatProvider`] trait so
//! tests can substitute scripted stubs. The production implementation,
//! [`HttpChatProvider`], speaks the OpenAI-style chat-completions protocol
//! over HTTP. Failures carry a retryability classification consumed by the
//! retry policy.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum length of raw-response snippets embedded in error detail.
const SNIPPET_LIMIT: usize = 800;

/// One message in a chat request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role (`system`, `user`, `assistant`)
    pub role: String,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Build a `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A single chat request.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Full model identifier (not the shortname)
    pub model: String,
    /// Ordered message list
    pub messages: Vec<ChatMessage>,
    /// Sampling parameters; unset fields are omitted from the wire request
    pub sampling: crate::types::SamplingParams,
    /// Transport-level timeout for this attempt
    pub timeout: Duration,
}

/// A successful chat response.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    /// Response text
    pub content: String,
    /// Reasoning trace, when the provider supplied one
    pub reasoning: Option<String>,
}

/// Provider failure with retryability classification
///
/// Transient conditions (timeout, rate limit, server error, transport
/// failure) are retryable; request/credential/model problems are not. The
/// classification lives on [`crate::retry::IsRetryable`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The attempt exceeded its timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider rejected the request with a rate-limit response (429)
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider-supplied detail, when present
        message: String,
    },

    /// The provider returned a server-side error (5xx)
    #[error("server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body snippet
        message: String,
    },

    /// Transport-level failure (connect, TLS, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Authentication or authorization failure (401/403)
    #[error("authentication failed (HTTP {status}): {message}")]
    Auth {
        /// HTTP status code
        status: u16,
        /// Response body snippet
        message: String,
    },

    /// The model identifier was rejected (404)
    #[error("invalid model {model:?}: {message}")]
    InvalidModel {
        /// The rejected model identifier
        model: String,
        /// Response body snippet
        message: String,
    },

    /// The request was rejected as invalid (other 4xx)
    #[error("invalid request (HTTP {status}): {message}")]
    InvalidRequest {
        /// HTTP status code
        status: u16,
        /// Response body snippet
        message: String,
    },

    /// The response arrived but had no usable content
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// What was missing or wrong
        message: String,
        /// Raw response snippet for diagnosis
        snippet: String,
    },

    /// API key environment variable is not set
    #[error("credentials unavailable: environment variable {env} is not set")]
    MissingCredentials {
        /// Name of the environment variable that was expected
        env: String,
    },
}

impl ProviderError {
    /// Short machine-readable error type for structured output.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Server { .. } => "server_error",
            ProviderError::Network(_) => "network",
            ProviderError::Auth { .. } => "auth",
            ProviderError::InvalidModel { .. } => "invalid_model",
            ProviderError::InvalidRequest { .. } => "invalid_request",
            ProviderError::MalformedResponse { .. } => "malformed_response",
            ProviderError::MissingCredentials { .. } => "missing_credentials",
        }
    }

    /// HTTP status code, when one was observed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::Server { status, .. }
            | ProviderError::Auth { status, .. }
            | ProviderError::InvalidRequest { status, .. } => Some(*status),
            ProviderError::InvalidModel { .. } => Some(404),
            ProviderError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Structured error detail for the output row's `error_info` field.
    pub fn error_info(&self, provider: &str, model: &str) -> Value {
        let mut info = json!({
            "provider": provider,
            "model": model,
            "type": self.kind(),
        });
        // json! with literal keys always produces an object
        if let Some(obj) = info.as_object_mut() {
            if let Some(status) = self.status_code() {
                obj.insert("status_code".to_string(), json!(status));
            }
            if let ProviderError::MalformedResponse { snippet, .. } = self
                && !snippet.is_empty()
            {
                obj.insert("raw_response_snippet".to_string(), json!(snippet));
            }
        }
        info
    }
}

/// Abstraction over the chat backend, enabling testability.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Issue one chat request. One call is one attempt; retrying is the
    /// retry policy's job, never the provider's.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Production [`ChatProvider`] speaking the OpenAI-style chat-completions
/// protocol.
#[derive(Debug)]
pub struct HttpChatProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpChatProvider {
    /// Create a provider for the given base URL. `api_key`, when present, is
    /// sent as a bearer token.
    pub fn new(base_url: &Url, api_key: Option<String>) -> Self {
        let mut endpoint = base_url.clone();
        // Url::join would drop a base path without a trailing slash
        {
            let path = endpoint.path().trim_end_matches('/').to_string();
            endpoint.set_path(&format!("{path}/chat/completions"));
        }
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    /// Create a provider taking the API key from the named environment
    /// variable. Fails when the variable is unset so that the problem is
    /// reported per-row as a credentials failure, not a confusing 401.
    pub fn from_env(base_url: &Url, api_key_env: &str) -> Result<Self, ProviderError> {
        let key = std::env::var(api_key_env).map_err(|_| ProviderError::MissingCredentials {
            env: api_key_env.to_string(),
        })?;
        Ok(Self::new(base_url, Some(key)))
    }

    fn build_body(request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": &request.model,
            "messages": &request.messages,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.sampling.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(p) = request.sampling.top_p {
                obj.insert("top_p".to_string(), json!(p));
            }
            if let Some(k) = request.sampling.top_k {
                obj.insert("top_k".to_string(), json!(k));
            }
        }
        body
    }
}

#[async_trait::async_trait]
impl ChatProvider for HttpChatProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut http = self
            .client
            .post(self.endpoint.clone())
            .timeout(request.timeout)
            .json(&Self::build_body(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = truncate(&body, SNIPPET_LIMIT);
            return Err(match status.as_u16() {
                429 => ProviderError::RateLimited { message },
                401 | 403 => ProviderError::Auth {
                    status: status.as_u16(),
                    message,
                },
                404 => ProviderError::InvalidModel {
                    model: request.model.clone(),
                    message,
                },
                s if s >= 500 => ProviderError::Server { status: s, message },
                s => ProviderError::InvalidRequest { status: s, message },
            });
        }

        let raw: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse {
                message: format!("response body is not JSON: {e}"),
                snippet: truncate(&body, SNIPPET_LIMIT),
            })?;

        let content = raw
            .pointer("/choices/0/message/content")
            .and_then(coerce_content)
            .ok_or_else(|| ProviderError::MalformedResponse {
                message: "response missing content".to_string(),
                snippet: json_snippet(&raw),
            })?;

        Ok(ChatResponse {
            reasoning: extract_reasoning(&raw),
            content,
        })
    }
}

/// Coerce a response `content` value into text.
///
/// Providers return either a plain string or a list of typed blocks; text
/// and `output_text` blocks are concatenated. A blank result counts as
/// missing content.
fn coerce_content(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let mut parts: Vec<&str> = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.as_str()),
                    Value::Object(obj) => {
                        let block_type = obj.get("type").and_then(Value::as_str);
                        if matches!(block_type, Some("text" | "output_text"))
                            && let Some(text) = obj
                                .get("text")
                                .or_else(|| obj.get("content"))
                                .and_then(Value::as_str)
                        {
                            parts.push(text);
                        }
                    }
                    _ => {}
                }
            }
            let joined = parts.concat();
            if joined.trim().is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

/// Keys under which providers have been observed to put reasoning traces.
const REASONING_KEYS: [&str; 4] = ["reasoning", "reasoning_content", "thinking", "thoughts"];

fn non_blank_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Pull a reasoning trace out of a raw provider response, checking the
/// response, first-choice, and message levels, then structured content
/// blocks of type `reasoning`/`thinking`.
fn extract_reasoning(raw: &Value) -> Option<String> {
    for key in REASONING_KEYS {
        if let Some(value) = non_blank_str(raw, key) {
            return Some(value.to_string());
        }
    }

    let choice = raw.pointer("/choices/0")?;
    for key in REASONING_KEYS {
        if let Some(value) = non_blank_str(choice, key) {
            return Some(value.to_string());
        }
    }

    let message = choice.get("message")?;
    for key in REASONING_KEYS {
        if let Some(value) = non_blank_str(message, key) {
            return Some(value.to_string());
        }
    }

    if let Some(Value::Array(blocks)) = message.get("content") {
        let parts: Vec<&str> = blocks
            .iter()
            .filter(|b| {
                matches!(
                    b.get("type").and_then(Value::as_str),
                    Some("reasoning" | "thinking")
                )
            })
            .filter_map(|b| {
                b.get("text")
                    .or_else(|| b.get("content"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
            })
            .collect();
        if !parts.is_empty() {
            return Some(parts.join("\n"));
        }
    }

    None
}

/// Truncate text to `limit` characters, appending an ellipsis when cut.
pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}…")
}

/// Compact JSON snippet of a value, truncated for error detail.
pub(crate) fn json_snippet(value: &Value) -> String {
    truncate(&value.to_string(), SNIPPET_LIMIT)
}
