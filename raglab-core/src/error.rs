//! The workspace-wide error-kind taxonomy.
//!
//! These kinds are *data*, not exceptions: they are attached to a
//! [`TechniqueResult`](crate::types::TechniqueResult) or an evaluation row
//! and are never thrown across the dispatcher boundary.

use serde::{Deserialize, Serialize};

/// Classification of a failed technique run or evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested technique name is not in the registry.
    UnknownTechnique,
    /// A vector index or embedding call failed after retries.
    RetrievalFailed,
    /// An LLM completion failed permanently.
    LlmFailed,
    /// The per-technique (or per-evaluation) budget was exceeded.
    Timeout,
    /// The caller canceled the request.
    Canceled,
    /// An evaluator could not score the record.
    EvaluatorFailed,
    /// Results could not be written to the store.
    PersistenceFailed,
    /// A bug: an unhandled error reached the dispatcher.
    InternalError,
}

impl ErrorKind {
    /// The stable string form used in persisted rows and trace events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTechnique => "unknown_technique",
            ErrorKind::RetrievalFailed => "retrieval_failed",
            ErrorKind::LlmFailed => "llm_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::EvaluatorFailed => "evaluator_failed",
            ErrorKind::PersistenceFailed => "persistence_failed",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Parse the stable string form back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown_technique" => Some(ErrorKind::UnknownTechnique),
            "retrieval_failed" => Some(ErrorKind::RetrievalFailed),
            "llm_failed" => Some(ErrorKind::LlmFailed),
            "timeout" => Some(ErrorKind::Timeout),
            "canceled" => Some(ErrorKind::Canceled),
            "evaluator_failed" => Some(ErrorKind::EvaluatorFailed),
            "persistence_failed" => Some(ErrorKind::PersistenceFailed),
            "internal_error" => Some(ErrorKind::InternalError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_stable_strings() {
        let kinds = [
            ErrorKind::UnknownTechnique,
            ErrorKind::RetrievalFailed,
            ErrorKind::LlmFailed,
            ErrorKind::Timeout,
            ErrorKind::Canceled,
            ErrorKind::EvaluatorFailed,
            ErrorKind::PersistenceFailed,
            ErrorKind::InternalError,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("not_a_kind"), None);
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RetrievalFailed).unwrap();
        assert_eq!(json, "\"retrieval_failed\"");
    }
}
