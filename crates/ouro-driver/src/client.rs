//! Chat-completion backend for the OpenAI-compatible endpoint.
//!
//! One request shape: the fixed system prompt, the growing per-agent
//! history, `temperature 0.1`. The assistant message is kept as raw JSON
//! and re-sent verbatim on later calls; the driver reads only `content`
//! and, when present, `reasoning` out of it.

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Duration;

use crate::error::{DriverError, Result};
use crate::extract::extract_code;
use crate::models::{ProxyClientConfig, fetch_available_models};
use crate::prompts::SYSTEM_PROMPT;
use crate::usage::{Usage, normalize_usage};

/// Default timeout for completion requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
///
/// System and user messages are plain `{role, content}` pairs. Assistant
/// messages are the provider's object passed through opaquely, so fields
/// like `reasoning` survive the round trip without being modeled.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Plain { role: Role, content: String },
    Raw(serde_json::Value),
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::Plain {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::Plain {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Wrap a provider assistant message verbatim.
    pub fn assistant_raw(message: serde_json::Value) -> Self {
        ChatMessage::Raw(message)
    }
}

/// One model reply, post-processed for the turn loop.
#[derive(Debug, Clone)]
pub struct Generation {
    /// The raw assistant message, re-sent verbatim on later calls.
    pub message: serde_json::Value,
    /// Extracted `repl` code, empty when none was found.
    pub code: String,
    /// Whether any code was extracted.
    pub success: bool,
    /// Opaque reasoning attached by the provider, logged but never re-sent.
    pub reasoning: Option<String>,
    /// Canonical usage for this call.
    pub usage: Usage,
}

impl Generation {
    /// Post-process a raw assistant message: extract code, lift reasoning.
    pub fn from_message(message: serde_json::Value, usage: Usage) -> Self {
        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        let reasoning = message
            .get("reasoning")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        let (code, success) = extract_code(content);
        Self {
            message,
            code,
            success,
            reasoning,
            usage,
        }
    }
}

/// The model boundary the driver runs against.
///
/// The HTTP [`ChatClient`] is the production implementation; tests script
/// replies through `testing::MockChatBackend`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Issue one completion call and post-process the reply.
    async fn generate_code(&self, messages: &[ChatMessage], model: &str) -> Result<Generation>;

    /// List the model ids available at the endpoint.
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// HTTP client for `POST {base}/chat/completions` and `GET {base}/models`.
pub struct ChatClient {
    http: reqwest::Client,
    config: ProxyClientConfig,
    temperature: f32,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ChatClient {
    pub fn new(config: ProxyClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DriverError::Proxy(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            temperature: 0.1,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        })
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn config(&self) -> &ProxyClientConfig {
        &self.config
    }

    /// POST with transient-failure retry. Anything the server actually
    /// answered surfaces immediately.
    async fn post_with_retry(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut attempt = 0;
        let mut backoff = self.retry_backoff;
        loop {
            match self
                .http
                .post(url)
                .bearer_auth(&self.config.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries && (e.is_connect() || e.is_timeout()) => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "completion request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    return Err(DriverError::Proxy(format!("POST {url} failed: {e}")));
                }
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn generate_code(&self, messages: &[ChatMessage], model: &str) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let system = ChatMessage::system(SYSTEM_PROMPT);
        let mut outbound: Vec<&ChatMessage> = Vec::with_capacity(messages.len() + 1);
        outbound.push(&system);
        outbound.extend(messages.iter());

        let body = serde_json::json!({
            "model": model,
            "messages": outbound,
            "temperature": self.temperature,
        });

        let response = self.post_with_retry(&url, &body).await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DriverError::Proxy(format!(
                "POST {url} returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DriverError::Proxy(format!("invalid completion response: {e}")))?;

        let message = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .cloned()
            .ok_or_else(|| {
                DriverError::Proxy("completion response carried no choices[0].message".to_string())
            })?;

        let usage = match payload.get("usage") {
            Some(raw) if !raw.is_null() => normalize_usage(raw)?,
            _ => Usage::default(),
        };

        Ok(Generation::from_message(message, usage))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        fetch_available_models(&self.http, &self.config).await
    }
}
