//! Error types for the `raglab-model` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a [`ChatModel`](crate::ChatModel) call.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The call exceeded the client-level timeout.
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),

    /// The backend rejected the call with a rate limit; retried by the client.
    #[error("rate limited by the model backend")]
    RateLimited,

    /// A transient upstream failure (5xx); retried by the client.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status returned by the backend.
        status: u16,
        /// Error detail extracted from the response body.
        message: String,
    },

    /// A permanent failure (auth, malformed request); never retried.
    #[error("permanent model error: {0}")]
    Permanent(String),

    /// The transport failed before a response arrived; retried by the client.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered but the completion text was empty.
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

impl ModelError {
    /// Whether the retry policy may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited | ModelError::Upstream { .. } | ModelError::Transport(_)
        )
    }
}

/// A convenience result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(ModelError::RateLimited.is_retryable());
        assert!(ModelError::Upstream { status: 503, message: "overloaded".into() }.is_retryable());
        assert!(ModelError::Transport("connection reset".into()).is_retryable());
        assert!(!ModelError::Permanent("bad api key".into()).is_retryable());
        assert!(!ModelError::Timeout(Duration::from_secs(60)).is_retryable());
        assert!(!ModelError::EmptyCompletion.is_retryable());
    }
}
