//! Vector index trait.

use async_trait::async_trait;

use raglab_core::{EmbeddedChunk, RetrievedChunk};

use crate::error::Result;

/// A store of embedded chunks with similarity search.
///
/// Scores are similarities ≥ 0, higher = more similar; results are ordered
/// strictly descending and are stable across repeat calls with the same
/// inputs and an unchanged index. Reads are concurrent; writes happen only
/// at ingest.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks by `chunk_id`.
    async fn upsert(&self, chunks: Vec<EmbeddedChunk>) -> Result<()>;

    /// Return the `k` chunks most similar to `query`, optionally restricted
    /// to the given document ids. An empty restriction list means no filter.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_ids: &[String],
    ) -> Result<Vec<RetrievedChunk>>;

    /// Remove every chunk belonging to `document_id`; returns how many were
    /// removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Dimension of the vectors this index holds.
    fn dimensions(&self) -> usize;
}
