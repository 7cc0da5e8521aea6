//! Embedding provider trait and OpenAI-compatible HTTP implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{IndexError, Result};

/// A provider that embeds batches of texts into fixed-dimension vectors.
///
/// Every returned vector has the dimension reported by
/// [`dimensions`](EmbeddingProvider::dimensions); implementations must
/// verify this against the backend's responses.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors.pop().ok_or_else(|| IndexError::Embedding {
            provider: "unknown".into(),
            message: "backend returned no vectors".into(),
        })
    }

    /// Dimension of the vectors this provider produces.
    fn dimensions(&self) -> usize;
}

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible `/embeddings`
/// endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    /// Create a provider for `base_url` (without the `/embeddings` suffix).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    data: Vec<WireEmbedding>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(model = %self.model, batch_size = texts.len(), "embedding batch");

        let url = format!("{}/embeddings", self.base_url);
        let body = WireRequest { model: &self.model, input: texts, encoding_format: "float" };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "embedding request failed");
                IndexError::Embedding { provider: self.model.clone(), message: e.to_string() }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "embedding backend error");
            return Err(IndexError::Embedding {
                provider: self.model.clone(),
                message: format!("backend returned {status}: {detail}"),
            });
        }

        let parsed: WireResponse = response.json().await.map_err(|e| IndexError::Embedding {
            provider: self.model.clone(),
            message: format!("invalid response body: {e}"),
        })?;

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }
        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding {
                provider: self.model.clone(),
                message: format!("asked for {} vectors, got {}", texts.len(), vectors.len()),
            });
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
