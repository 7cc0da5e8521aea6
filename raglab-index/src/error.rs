//! Error types for the `raglab-index` crate.

use thiserror::Error;

/// Errors from retrieval collaborators.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An embedding backend call failed.
    #[error("embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector whose dimension does not match the index.
    #[error("dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was created with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// A vector index backend failure.
    #[error("vector index error: {0}")]
    VectorIndex(String),
}

/// A convenience result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
