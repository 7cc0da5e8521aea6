//! Error types for the `raglab-eval` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors from the evaluators.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The judge or metric model call failed.
    #[error("evaluator model call failed: {0}")]
    Model(String),

    /// The embedding call for answer relevancy failed.
    #[error("evaluator embedding call failed: {0}")]
    Embedding(String),

    /// One evaluation exceeded its isolation-worker budget.
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// The worker pool is gone (shutting down).
    #[error("evaluation worker unavailable")]
    WorkerGone,
}

/// A convenience result type for evaluator operations.
pub type Result<T> = std::result::Result<T, EvalError>;
