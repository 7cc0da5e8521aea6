//! The [`ChatModel`] trait.

use async_trait::async_trait;

use crate::error::Result;

/// One text completion request: a system prompt, a user message and
/// sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System prompt; may be empty.
    pub system: String,
    /// User message.
    pub user: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap in tokens.
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Build a request with the given prompts and default sampling
    /// (temperature 0.0, 1024 tokens).
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self { system: system.into(), user: user.into(), temperature: 0.0, max_tokens: 1024 }
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the completion length cap.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A text-completion capability.
///
/// Implementations are stateless across calls and safe for concurrent use;
/// they own their retry policy (exponential backoff, at most 3 tries) and a
/// per-call timeout.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier of the backing model, for logs and score rows.
    fn name(&self) -> &str;

    /// Run one completion and return its text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
