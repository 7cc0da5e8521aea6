//! Fixed-size document chunking for ingest.

use std::collections::HashMap;

use raglab_core::Chunk;

/// Splits text into fixed-size chunks by character count with overlap.
///
/// Chunk ids follow the `{document_id}_{ordinal}` convention. Splitting
/// respects character boundaries, so multi-byte text never panics.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a chunker producing chunks of at most `chunk_size` characters
    /// with `chunk_overlap` characters shared between neighbours.
    /// `chunk_overlap` is capped below `chunk_size` so ingest always makes
    /// progress.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self { chunk_size, chunk_overlap: chunk_overlap.min(chunk_size - 1) }
    }

    /// Split `text` into chunks owned by `document_id`.
    pub fn chunk(
        &self,
        document_id: &str,
        text: &str,
        metadata: &HashMap<String, String>,
    ) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut ordinal = 0u32;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            chunks.push(Chunk::new(document_id, ordinal, piece, metadata.clone()));
            ordinal += 1;
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}
