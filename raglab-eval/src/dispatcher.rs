//! Bounded-concurrency batch evaluation over persisted QA records.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{info, warn};

use raglab_core::{ErrorKind, EvaluationScore, ScoreType};
use raglab_index::EmbeddingProvider;
use raglab_model::ChatModel;

use crate::judge::LlmJudge;
use crate::reference::ReferenceMetricsEvaluator;
use crate::worker::{ReferenceJob, ReferenceWorkerPool, DEFAULT_EVAL_TIMEOUT};

/// Default evaluation concurrency.
const DEFAULT_CONCURRENCY: usize = 2;

/// Hard cap on evaluation concurrency.
const MAX_CONCURRENCY: usize = 5;

/// The slice of a QA record the evaluators need.
#[derive(Debug, Clone)]
pub struct EvalRecord {
    /// Row id of the record.
    pub id: i64,
    /// The original query.
    pub query: String,
    /// The generated answer.
    pub answer: String,
    /// Context texts in final order (may be empty).
    pub contexts: Vec<String>,
}

/// Boxed error for the store seam.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Where the dispatcher loads records from and persists scores to.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load one record by id; `None` when it does not exist.
    async fn load_eval_record(&self, id: i64) -> Result<Option<EvalRecord>, StoreError>;

    /// Persist one evaluation score row; returns the new row id.
    async fn save_score(&self, score: &EvaluationScore) -> Result<i64, StoreError>;
}

/// Which tracks to run and with what reference material.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Run the dimensional LLM judge.
    pub use_llm: bool,
    /// Run the reference-metric evaluator.
    pub use_reference: bool,
    /// Optional reference answers keyed by record id.
    pub reference_answers: HashMap<i64, String>,
}

/// Per-record evaluation outcome.
#[derive(Debug)]
pub struct RecordEvaluation {
    /// The evaluated record id.
    pub qa_record_id: i64,
    /// Scores produced and persisted for this record.
    pub scores: Vec<EvaluationScore>,
    /// Set when at least one track failed for this record.
    pub error_kind: Option<ErrorKind>,
}

/// Bounded-concurrency executor for evaluating batches of QA records.
///
/// The reference track submits to the isolation worker pool, which is
/// sized to the same concurrency bound; each worker serializes its jobs.
pub struct EvalDispatcher<S: RecordStore> {
    judge: LlmJudge,
    reference_pool: ReferenceWorkerPool,
    reference_name: String,
    store: Arc<S>,
    concurrency: usize,
}

impl<S: RecordStore> EvalDispatcher<S> {
    /// Build a dispatcher with its judge and worker pool.
    ///
    /// `concurrency` defaults to 2 when 0 and is capped at 5.
    pub fn new(
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<S>,
        concurrency: usize,
    ) -> Self {
        let concurrency = match concurrency {
            0 => DEFAULT_CONCURRENCY,
            c => c.min(MAX_CONCURRENCY),
        };
        let evaluator = Arc::new(ReferenceMetricsEvaluator::new(model.clone(), embedder));
        let reference_name = evaluator.evaluator_name();
        Self {
            judge: LlmJudge::new(model),
            reference_pool: ReferenceWorkerPool::new(evaluator, concurrency, DEFAULT_EVAL_TIMEOUT),
            reference_name,
            store,
            concurrency,
        }
    }

    /// Evaluate a batch of records. Per-record failures are independent;
    /// results carry the scores that were persisted and an `error_kind`
    /// when a track failed. No cross-record ordering is guaranteed.
    pub async fn evaluate_batch(
        &self,
        qa_record_ids: &[i64],
        options: &EvalOptions,
    ) -> Vec<RecordEvaluation> {
        let evaluations: Vec<RecordEvaluation> = stream::iter(qa_record_ids.iter().copied())
            .map(|id| self.evaluate_record(id, options))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = evaluations.iter().filter(|e| e.error_kind.is_some()).count();
        info!(records = evaluations.len(), failed, "batch evaluation complete");
        evaluations
    }

    async fn evaluate_record(&self, id: i64, options: &EvalOptions) -> RecordEvaluation {
        let record = match self.store.load_eval_record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(qa_record_id = id, "record not found for evaluation");
                return RecordEvaluation {
                    qa_record_id: id,
                    scores: Vec::new(),
                    error_kind: Some(ErrorKind::EvaluatorFailed),
                };
            }
            Err(e) => {
                warn!(qa_record_id = id, error = %e, "record load failed");
                return RecordEvaluation {
                    qa_record_id: id,
                    scores: Vec::new(),
                    error_kind: Some(ErrorKind::PersistenceFailed),
                };
            }
        };

        let reference = options.reference_answers.get(&id).map(String::as_str);
        let mut scores = Vec::new();
        let mut error_kind = None;

        if options.use_llm {
            match self.run_llm_track(&record, reference).await {
                Ok(score) => scores.push(score),
                Err(kind) => error_kind = Some(kind),
            }
        }

        if options.use_reference {
            match self.run_reference_track(&record, reference).await {
                Ok(score) => scores.push(score),
                Err(kind) => error_kind = Some(kind),
            }
        }

        RecordEvaluation { qa_record_id: id, scores, error_kind }
    }

    async fn run_llm_track(
        &self,
        record: &EvalRecord,
        reference: Option<&str>,
    ) -> Result<EvaluationScore, ErrorKind> {
        let report = self
            .judge
            .evaluate(&record.query, &record.answer, &record.contexts, reference)
            .await;

        let mut metadata = json!({});
        if !report.failures.is_empty() {
            metadata["failed_dimensions"] = json!(report.failures);
        }
        if let Some(correctness) = report.correctness {
            metadata["correctness"] = json!(correctness);
        }

        let score = EvaluationScore {
            qa_record_id: record.id,
            score_type: ScoreType::LlmDimensional,
            dimensions: report.dimensions,
            overall: report.overall,
            evaluator: self.judge.evaluator_name(),
            feedback: Some(report.feedback),
            metadata,
            create_time: Utc::now(),
        };
        self.persist(score).await
    }

    async fn run_reference_track(
        &self,
        record: &EvalRecord,
        reference: Option<&str>,
    ) -> Result<EvaluationScore, ErrorKind> {
        let job = ReferenceJob {
            query: record.query.clone(),
            answer: record.answer.clone(),
            contexts: record.contexts.clone(),
            reference: reference.map(str::to_string),
        };
        let report = match self.reference_pool.evaluate(job).await {
            Ok(report) => report,
            Err(e) => {
                warn!(qa_record_id = record.id, error = %e, "reference evaluation failed");
                return Err(ErrorKind::EvaluatorFailed);
            }
        };

        let mut dimensions = std::collections::BTreeMap::new();
        dimensions.insert("faithfulness".to_string(), report.faithfulness);
        dimensions.insert("answer_relevancy".to_string(), report.answer_relevancy);
        if let Some(precision) = report.context_precision {
            dimensions.insert("context_precision".to_string(), precision);
        }
        if let Some(recall) = report.context_recall {
            dimensions.insert("context_recall".to_string(), recall);
        }
        let overall = dimensions.values().sum::<f64>() / dimensions.len() as f64;

        let mut reference_scores = json!({
            "faithfulness": report.faithfulness,
            "answer_relevancy": report.answer_relevancy,
        });
        if let Some(precision) = report.context_precision {
            reference_scores["context_precision"] = json!(precision);
        }
        if let Some(recall) = report.context_recall {
            reference_scores["context_recall"] = json!(recall);
        }
        let mut metadata = json!({ "reference_scores": reference_scores });
        if report.no_claims {
            metadata["no_claims"] = json!(true);
        }

        let score = EvaluationScore {
            qa_record_id: record.id,
            score_type: ScoreType::ReferenceMetric,
            dimensions,
            overall: Some((overall * 1000.0).round() / 1000.0),
            evaluator: self.reference_name.clone(),
            feedback: None,
            metadata,
            create_time: Utc::now(),
        };
        self.persist(score).await
    }

    async fn persist(&self, score: EvaluationScore) -> Result<EvaluationScore, ErrorKind> {
        match self.store.save_score(&score).await {
            Ok(_) => Ok(score),
            Err(e) => {
                warn!(qa_record_id = score.qa_record_id, error = %e, "score persistence failed");
                Err(ErrorKind::PersistenceFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raglab_index::IndexError;
    use raglab_model::{CompletionRequest, ModelError};
    use std::sync::Mutex;

    struct ScriptModel;

    #[async_trait]
    impl ChatModel for ScriptModel {
        fn name(&self) -> &str {
            "script"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            if request.system.contains("atomic factual claims") {
                Ok("1. Paris is the capital of France.".into())
            } else if request.system.contains("reverse-engineer") {
                Ok("1. What is the capital of France?".into())
            } else if request.system.contains("quality judge") {
                Ok("8 - good".into())
            } else {
                Ok("yes".into())
            }
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: HashMap<i64, EvalRecord>,
        saved: Mutex<Vec<EvaluationScore>>,
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn load_eval_record(&self, id: i64) -> Result<Option<EvalRecord>, StoreError> {
            Ok(self.records.get(&id).cloned())
        }
        async fn save_score(&self, score: &EvaluationScore) -> Result<i64, StoreError> {
            let mut saved = self.saved.lock().unwrap();
            saved.push(score.clone());
            Ok(saved.len() as i64)
        }
    }

    fn store_with_record() -> Arc<MemoryStore> {
        let mut store = MemoryStore::default();
        store.records.insert(
            7,
            EvalRecord {
                id: 7,
                query: "What is the capital of France?".into(),
                answer: "Paris is the capital of France.".into(),
                contexts: vec!["Paris is the capital of France.".into()],
            },
        );
        Arc::new(store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn both_tracks_produce_and_persist_scores() {
        let store = store_with_record();
        let dispatcher =
            EvalDispatcher::new(Arc::new(ScriptModel), Arc::new(UnitEmbedder), store.clone(), 2);

        let options = EvalOptions { use_llm: true, use_reference: true, ..Default::default() };
        let evaluations = dispatcher.evaluate_batch(&[7], &options).await;

        assert_eq!(evaluations.len(), 1);
        let evaluation = &evaluations[0];
        assert!(evaluation.error_kind.is_none());
        assert_eq!(evaluation.scores.len(), 2);

        let llm = evaluation
            .scores
            .iter()
            .find(|s| s.score_type == ScoreType::LlmDimensional)
            .unwrap();
        assert_eq!(llm.dimensions.len(), 5);
        assert_eq!(llm.overall, Some(8.0));

        let reference = evaluation
            .scores
            .iter()
            .find(|s| s.score_type == ScoreType::ReferenceMetric)
            .unwrap();
        assert_eq!(reference.dimensions["faithfulness"], 1.0);
        assert!(reference.metadata["reference_scores"]["answer_relevancy"].is_number());

        assert_eq!(store.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_records_fail_without_poisoning_the_batch() {
        let store = store_with_record();
        let dispatcher =
            EvalDispatcher::new(Arc::new(ScriptModel), Arc::new(UnitEmbedder), store, 2);

        let options = EvalOptions { use_llm: true, use_reference: false, ..Default::default() };
        let mut evaluations = dispatcher.evaluate_batch(&[7, 999], &options).await;
        evaluations.sort_by_key(|e| e.qa_record_id);

        assert!(evaluations[0].error_kind.is_none());
        assert_eq!(evaluations[1].error_kind, Some(ErrorKind::EvaluatorFailed));
        assert!(evaluations[1].scores.is_empty());
    }
}
