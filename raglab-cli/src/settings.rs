//! Environment-based settings for the CLI.

use std::env;

/// Backend endpoints and defaults, read from `RAGLAB_*` variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// OpenAI-compatible chat completions base URL.
    pub llm_base_url: String,
    /// API key for the LLM backend.
    pub llm_api_key: String,
    /// Chat model name.
    pub llm_model: String,
    /// OpenAI-compatible embeddings base URL.
    pub embedding_base_url: String,
    /// API key for the embedding backend.
    pub embedding_api_key: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Embedding dimension; must match the stored vectors.
    pub embedding_dimensions: usize,
    /// SQLite database path.
    pub db_path: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Read settings from the environment, with local defaults.
    pub fn from_env() -> Self {
        let llm_base_url = var_or("RAGLAB_LLM_BASE_URL", "http://localhost:8000/v1");
        Self {
            embedding_base_url: var_or("RAGLAB_EMBEDDING_BASE_URL", &llm_base_url),
            llm_base_url,
            llm_api_key: var_or("RAGLAB_LLM_API_KEY", ""),
            llm_model: var_or("RAGLAB_LLM_MODEL", "qwen-plus"),
            embedding_api_key: var_or("RAGLAB_EMBEDDING_API_KEY", ""),
            embedding_model: var_or("RAGLAB_EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimensions: env::var("RAGLAB_EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1536),
            db_path: var_or("RAGLAB_DB_PATH", "raglab.db"),
        }
    }
}
