//! Language renderer: the single text-completion call at the end of the
//! pipeline.
//!
//! The composer constructs the prompt deterministically; this adapter owns
//! transport, timeout, and retry policy. Transient failures (rate limits,
//! 5xx, timeouts) are retried with exponential backoff a bounded number of
//! times, after which [`RenderError::Exhausted`] tells the composer to fall
//! back to its static template. No provider error text ever reaches an end
//! user.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::config::{EndpointConfig, RetryConfig};
use crate::message::ConversationTurn;

/// Failure of the rendering tier. The only error kind the composer treats
/// as (locally) fatal — it degrades the reply to a pre-written template.
#[derive(Debug, Error, Diagnostic)]
pub enum RenderError {
    /// Transient failures persisted past the retry budget.
    #[error("completion endpoint unavailable after {attempts} attempts: {message}")]
    #[diagnostic(code(bhujal::render::exhausted))]
    Exhausted { attempts: u32, message: String },

    /// The endpoint answered with something that is not a completion.
    #[error("unexpected completion response: {0}")]
    #[diagnostic(code(bhujal::render::response))]
    InvalidResponse(String),
}

/// A text-completion capability.
///
/// Implementations receive the full prompt as conversation turns (system
/// prompt first) and return the rendered text unmodified.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, RenderError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Renderer backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleRenderer {
    client: reqwest::Client,
    config: EndpointConfig,
    retry: RetryConfig,
}

impl OpenAiCompatibleRenderer {
    pub fn new(config: EndpointConfig, retry: RetryConfig) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| RenderError::InvalidResponse(err.to_string()))?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    async fn attempt(&self, turns: &[ConversationTurn]) -> Result<String, AttemptError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| serde_json::json!({"role": turn.role, "content": turn.content}))
            .collect();

        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.config.model,
            "messages": messages,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AttemptError::Transient(err.to_string()))?;
        let status = response.status();

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AttemptError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(format!("status {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| AttemptError::Fatal(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AttemptError::Fatal("no choices in response".to_string()))
    }
}

enum AttemptError {
    /// Worth retrying: rate limit, server error, transport failure.
    Transient(String),
    /// Not worth retrying: auth, bad request, unparsable body.
    Fatal(String),
}

#[async_trait]
impl CompletionModel for OpenAiCompatibleRenderer {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, RenderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(turns).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(message)) => {
                    warn!(%message, "completion request failed permanently");
                    return Err(RenderError::InvalidResponse(message));
                }
                Err(AttemptError::Transient(message)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(%message, attempt, ?delay, "completion attempt failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Transient(message)) => {
                    return Err(RenderError::Exhausted {
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}
