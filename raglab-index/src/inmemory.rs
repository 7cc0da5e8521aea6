//! In-memory vector index using cosine similarity.
//!
//! Backed by a `HashMap` behind a `tokio::sync::RwLock`: readers do not
//! block each other and the fan-out only ever reads during a request.
//! Equal scores are tie-broken by `chunk_id` so repeat searches over a
//! frozen index return byte-identical orderings.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use raglab_core::{EmbeddedChunk, RetrievedChunk};

use crate::error::{IndexError, Result};
use crate::vector::VectorIndex;

/// A [`VectorIndex`] holding everything in process memory.
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimensions: usize,
    chunks: RwLock<HashMap<String, EmbeddedChunk>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, chunks: RwLock::new(HashMap::new()) }
    }

    /// Number of chunks currently stored.
    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Whether the index holds no chunks.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: chunk.embedding.len(),
                });
            }
        }
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            store.insert(chunk.chunk.chunk_id.clone(), chunk);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_ids: &[String],
    ) -> Result<Vec<RetrievedChunk>> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let store = self.chunks.read().await;
        let mut scored: Vec<RetrievedChunk> = store
            .values()
            .filter(|c| {
                document_ids.is_empty()
                    || document_ids.iter().any(|d| *d == c.chunk.document_id)
            })
            .map(|c| {
                // Similarity clamped to ≥ 0 per the index contract.
                let score = cosine_similarity(&c.embedding, query).max(0.0) as f64;
                RetrievedChunk {
                    chunk_id: c.chunk.chunk_id.clone(),
                    text: c.chunk.text.clone(),
                    metadata: c.chunk.metadata.clone(),
                    score,
                    sub_scores: Default::default(),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut store = self.chunks.write().await;
        let before = store.len();
        store.retain(|_, c| c.chunk.document_id != document_id);
        Ok(before - store.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
