//! The per-query configuration surface.
//!
//! A request carries an open JSON mapping; the recognized keys below are
//! extracted and everything else is ignored silently so older clients with
//! leaner configs keep working.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sub-mode of the query-transformation technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationType {
    /// Rewrite the query to be more specific (one LLM call).
    #[default]
    Rewrite,
    /// Produce one broader background query.
    Stepback,
    /// Split the query into independent sub-queries.
    Decompose,
}

impl TransformationType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "rewrite" => Some(TransformationType::Rewrite),
            "stepback" => Some(TransformationType::Stepback),
            "decompose" => Some(TransformationType::Decompose),
            _ => None,
        }
    }

    /// Stable string form used in trace events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformationType::Rewrite => "rewrite",
            TransformationType::Stepback => "stepback",
            TransformationType::Decompose => "decompose",
        }
    }
}

/// Recognized per-query settings with their defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Final context size.
    pub top_k: usize,
    /// Fan-out concurrency bound (clamped to 1..=10).
    pub max_concurrency: usize,
    /// Per-technique wall-clock budget.
    pub per_technique_timeout: Duration,
    /// Candidate pool for the reranker; defaults to `max(4·top_k, 20)`.
    pub rerank_candidates: Option<usize>,
    /// Weight of the vector component in fusion scoring.
    pub vector_weight: f64,
    /// Weight of the lexical component in fusion scoring.
    pub lexical_weight: f64,
    /// Sub-mode of the query-transformation technique.
    pub transformation_type: TransformationType,
    /// Number of sub-queries for decompose mode.
    pub num_subqueries: usize,
    /// Minimum composite score for self-reflective answer acceptance.
    pub min_support_score: i64,
    /// Cosine-distance threshold for diversity-biased selection.
    pub diversity_theta: f64,
    /// Sampling temperature for hypothetical-document generation.
    pub hyde_temperature: f32,
    /// Optional override for the answer-generation system prompt.
    pub system_prompt: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_concurrency: 3,
            per_technique_timeout: Duration::from_secs(120),
            rerank_candidates: None,
            vector_weight: 0.5,
            lexical_weight: 0.5,
            transformation_type: TransformationType::default(),
            num_subqueries: 3,
            min_support_score: 1,
            diversity_theta: 0.15,
            hyde_temperature: 0.7,
            system_prompt: None,
        }
    }
}

impl QueryConfig {
    /// Extract the recognized keys from an open JSON mapping.
    ///
    /// Unknown keys and ill-typed values are ignored; defaults fill the
    /// gaps. `max_concurrency` is clamped to 1..=10.
    pub fn from_json(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(map) = value.as_object() else {
            return config;
        };

        if let Some(k) = map.get("top_k").and_then(Value::as_u64) {
            config.top_k = k as usize;
        }
        if let Some(c) = map.get("max_concurrency").and_then(Value::as_u64) {
            config.max_concurrency = (c as usize).clamp(1, 10);
        }
        if let Some(secs) = map.get("per_technique_timeout_s").and_then(Value::as_f64) {
            if secs > 0.0 {
                config.per_technique_timeout = Duration::from_secs_f64(secs);
            }
        }
        if let Some(n) = map.get("rerank_candidates").and_then(Value::as_u64) {
            config.rerank_candidates = Some(n as usize);
        }
        if let Some(w) = map.get("vector_weight").and_then(Value::as_f64) {
            config.vector_weight = w;
        }
        if let Some(w) = map.get("lexical_weight").and_then(Value::as_f64) {
            config.lexical_weight = w;
        }
        if let Some(t) = map
            .get("transformation_type")
            .and_then(Value::as_str)
            .and_then(TransformationType::parse)
        {
            config.transformation_type = t;
        }
        if let Some(n) = map.get("num_subqueries").and_then(Value::as_u64) {
            if n > 0 {
                config.num_subqueries = n as usize;
            }
        }
        if let Some(s) = map.get("min_support_score").and_then(Value::as_i64) {
            config.min_support_score = s;
        }
        if let Some(t) = map.get("diversity_theta").and_then(Value::as_f64) {
            config.diversity_theta = t;
        }
        if let Some(t) = map.get("hyde_temperature").and_then(Value::as_f64) {
            config.hyde_temperature = t as f32;
        }
        if let Some(p) = map.get("system_prompt").and_then(Value::as_str) {
            config.system_prompt = Some(p.to_string());
        }

        config
    }

    /// Reranker candidate pool for a given `top_k`.
    pub fn rerank_pool(&self, top_k: usize) -> usize {
        self.rerank_candidates.unwrap_or_else(|| (4 * top_k).max(20))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = QueryConfig::default();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.per_technique_timeout, Duration::from_secs(120));
        assert_eq!(config.vector_weight, 0.5);
        assert_eq!(config.num_subqueries, 3);
        assert_eq!(config.transformation_type, TransformationType::Rewrite);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = QueryConfig::from_json(&json!({
            "top_k": 8,
            "some_future_knob": {"nested": true},
            "another_unknown": 42,
        }));
        assert_eq!(config.top_k, 8);
    }

    #[test]
    fn max_concurrency_is_clamped() {
        let low = QueryConfig::from_json(&json!({"max_concurrency": 0}));
        assert_eq!(low.max_concurrency, 1);
        let high = QueryConfig::from_json(&json!({"max_concurrency": 64}));
        assert_eq!(high.max_concurrency, 10);
    }

    #[test]
    fn rerank_pool_has_a_floor_of_twenty() {
        let config = QueryConfig::default();
        assert_eq!(config.rerank_pool(3), 20);
        assert_eq!(config.rerank_pool(10), 40);
        let explicit = QueryConfig::from_json(&json!({"rerank_candidates": 12}));
        assert_eq!(explicit.rerank_pool(3), 12);
    }

    #[test]
    fn transformation_type_parses_from_config() {
        let config = QueryConfig::from_json(&json!({"transformation_type": "decompose"}));
        assert_eq!(config.transformation_type, TransformationType::Decompose);
        let bad = QueryConfig::from_json(&json!({"transformation_type": "reverse"}));
        assert_eq!(bad.transformation_type, TransformationType::Rewrite);
    }
}
