//! OpenAI-compatible chat completion client.
//!
//! Calls a `/chat/completions` endpoint with `reqwest`. Works against any
//! backend that speaks the OpenAI wire shape (OpenAI, DashScope, vLLM,
//! llama.cpp server, …).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ModelError, Result};
use crate::model::{ChatModel, CompletionRequest};

/// Default per-call timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum attempts per completion (1 initial + 2 retries).
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// A [`ChatModel`] backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiChatModel {
    /// Create a client for `base_url` (without the `/chat/completions`
    /// suffix) using `model`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(WireMessage { role: "system", content: &request.system });
        }
        messages.push(WireMessage { role: "user", content: &request.user });

        let body = WireRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let send = self.client.post(&url).bearer_auth(&self.api_key).json(&body).send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))?
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<WireError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(match status.as_u16() {
                429 => ModelError::RateLimited,
                s if s >= 500 => ModelError::Upstream { status: s, message: detail },
                _ => ModelError::Permanent(format!("{status}: {detail}")),
            });
        }

        let parsed: WireResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))?
            .map_err(|e| ModelError::Transport(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ModelError::EmptyCompletion);
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.attempt(request).await {
                Ok(text) => {
                    debug!(model = %self.model, attempt, chars = text.len(), "completion ok");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    warn!(model = %self.model, attempt, error = %e, "completion retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(ModelError::EmptyCompletion))
    }
}

// ── OpenAI wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Deserialize)]
struct WireErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let model = OpenAiChatModel::new("https://api.example.com/v1/", "sk-test", "test-model");
        assert_eq!(model.base_url, "https://api.example.com/v1");
        assert_eq!(model.name(), "test-model");
    }

    #[test]
    fn request_serializes_without_system_when_empty() {
        let request = CompletionRequest::new("", "hello").temperature(0.2).max_tokens(64);
        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(WireMessage { role: "system", content: &request.system });
        }
        messages.push(WireMessage { role: "user", content: &request.user });
        let body = WireRequest {
            model: "m",
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 64);
    }
}
