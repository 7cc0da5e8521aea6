//! Data types for chunks, retrieval results, technique outcomes and scores.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::trace::TraceEvent;

/// A semantic unit of a source document.
///
/// `(document_id, ordinal)` is unique within the index; `chunk_id` is the
/// stable identifier `{document_id}_{ordinal}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier for the chunk.
    pub chunk_id: String,
    /// The ID of the parent document.
    pub document_id: String,
    /// Position of the chunk within its document.
    pub ordinal: u32,
    /// The text content of the chunk.
    pub text: String,
    /// Key-value metadata inherited from the document (filename, section).
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Build a chunk, deriving `chunk_id` from `(document_id, ordinal)`.
    pub fn new(
        document_id: impl Into<String>,
        ordinal: u32,
        text: impl Into<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let document_id = document_id.into();
        Self {
            chunk_id: format!("{document_id}_{ordinal}"),
            document_id,
            ordinal,
            text: text.into(),
            metadata,
        }
    }
}

/// A [`Chunk`] paired with its embedding vector.
///
/// All embeddings stored in one index have the same dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// The underlying chunk.
    pub chunk: Chunk,
    /// The embedding vector for the chunk's text.
    pub embedding: Vec<f32>,
}

/// A chunk reference produced by a retrieval step.
///
/// Request-scoped: the set of retrieved chunks is attached to a
/// [`TechniqueResult`] and serialized with it, never stored on its own.
/// The meaning of `score` is defined by the producing retriever; secondary
/// scores (vector, lexical, rerank) are kept under `sub_scores`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Identifier of the referenced chunk.
    pub chunk_id: String,
    /// Snapshot of the chunk text at retrieval time.
    pub text: String,
    /// Snapshot of the chunk metadata at retrieval time.
    pub metadata: HashMap<String, String>,
    /// The ranking score assigned by the producing retriever.
    pub score: f64,
    /// Secondary scores, e.g. `vector_score`, `lexical_score`, `rerank_score`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_scores: BTreeMap<String, f64>,
}

impl RetrievedChunk {
    /// Attach (or replace) a named sub-score.
    pub fn with_sub_score(mut self, name: &str, value: f64) -> Self {
        self.sub_scores.insert(name.to_string(), value);
        self
    }
}

/// The outcome of running one technique against one query.
///
/// Invariant: `error_kind.is_none()` implies `answer` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueResult {
    /// Registry name of the technique that produced this result.
    pub technique_name: String,
    /// The generated answer; empty when the run failed.
    pub answer: String,
    /// The evidence the answer is grounded on, in context order.
    pub retrieved_chunks: Vec<RetrievedChunk>,
    /// Ordered execution trace for the run.
    pub trace: Vec<TraceEvent>,
    /// Wall clock spent in the retrieval calls that produced the final context.
    pub retrieval_time_ms: u64,
    /// Wall clock of the completion that produced `answer`.
    pub generation_time_ms: u64,
    /// Total wall clock for the run.
    pub total_time_ms: u64,
    /// Failure classification; absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TechniqueResult {
    /// Whether the run completed without a recorded failure.
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// A conversation thread grouping persisted QA records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// UUID string identifier.
    pub id: String,
    /// Human-readable session title.
    pub title: String,
    /// Creation timestamp.
    pub create_time: DateTime<Utc>,
    /// Timestamp of the last write into the session.
    pub update_time: DateTime<Utc>,
}

/// A persisted [`TechniqueResult`] with its session linkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaRecord {
    /// Row id assigned by the store.
    pub id: i64,
    /// Owning session.
    pub session_id: String,
    /// The user query the fan-out ran against.
    pub query: String,
    /// Row creation timestamp.
    pub create_time: DateTime<Utc>,
    /// The recorded outcome.
    pub result: TechniqueResult,
}

/// Which track produced an evaluation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreType {
    /// Per-dimension 0–10 scores from the LLM judge.
    LlmDimensional,
    /// Ragas-style 0–1 metrics from the reference evaluator.
    ReferenceMetric,
    /// Manually entered scores.
    Human,
}

impl ScoreType {
    /// Stable string used in persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreType::LlmDimensional => "llm_dimensional",
            ScoreType::ReferenceMetric => "reference_metric",
            ScoreType::Human => "human",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm_dimensional" => Some(ScoreType::LlmDimensional),
            "reference_metric" => Some(ScoreType::ReferenceMetric),
            "human" => Some(ScoreType::Human),
            _ => None,
        }
    }
}

/// One scoring of one QA record by one evaluator.
///
/// Dimension values are 0–10 for [`ScoreType::LlmDimensional`] and 0–1 for
/// [`ScoreType::ReferenceMetric`]. For a given `(qa_record_id, score_type,
/// evaluator)` the latest row wins on read; earlier rows stay as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScore {
    /// The scored QA record.
    pub qa_record_id: i64,
    /// Which evaluation track produced the row.
    pub score_type: ScoreType,
    /// Dimension name → value.
    pub dimensions: BTreeMap<String, f64>,
    /// Aggregate over the present dimensions, when meaningful.
    pub overall: Option<f64>,
    /// Name of the evaluator (judge model or metric suite).
    pub evaluator: String,
    /// Concatenated human-readable feedback, when the evaluator produces any.
    pub feedback: Option<String>,
    /// Secondary scores and flags that do not fit the fixed dimensions.
    pub metadata: serde_json::Value,
    /// Row creation timestamp.
    pub create_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_derived_from_document_and_ordinal() {
        let chunk = Chunk::new("doc-7", 3, "text", HashMap::new());
        assert_eq!(chunk.chunk_id, "doc-7_3");
    }

    #[test]
    fn technique_result_serde_round_trip() {
        let result = TechniqueResult {
            technique_name: "baseline".into(),
            answer: "Paris is the capital of France.".into(),
            retrieved_chunks: vec![RetrievedChunk {
                chunk_id: "d_0".into(),
                text: "Paris is the capital of France.".into(),
                metadata: HashMap::new(),
                score: 0.91,
                sub_scores: BTreeMap::new(),
            }
            .with_sub_score("vector_score", 0.91)],
            trace: Vec::new(),
            retrieval_time_ms: 12,
            generation_time_ms: 840,
            total_time_ms: 860,
            error_kind: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: TechniqueResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn error_kind_is_omitted_from_json_on_success() {
        let result = TechniqueResult {
            technique_name: "baseline".into(),
            answer: "ok".into(),
            retrieved_chunks: Vec::new(),
            trace: Vec::new(),
            retrieval_time_ms: 0,
            generation_time_ms: 0,
            total_time_ms: 0,
            error_kind: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("error_kind"));
    }
}
