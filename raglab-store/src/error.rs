//! Error types for the `raglab-store` crate.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored JSON column could not be decoded.
    #[error("corrupt stored row: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// A convenience result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
