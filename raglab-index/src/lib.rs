//! Retrieval collaborators: the vector index, the embedding provider and
//! the per-query lexical index.
//!
//! The vector index and embedding provider are capability boundaries —
//! techniques depend only on the traits here. The in-memory index is the
//! default backend: read-concurrent, written at ingest, deterministic in
//! its result ordering.

pub mod chunker;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod lexical;
pub mod vector;

pub use chunker::FixedSizeChunker;
pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use error::{IndexError, Result};
pub use inmemory::InMemoryVectorIndex;
pub use lexical::LexicalIndex;
pub use vector::VectorIndex;
