//! Shared per-run machinery for techniques.
//!
//! A [`Toolkit`] bundles the capability set a technique works against —
//! embed, search, complete, log — plus the cancellation token and the
//! retrieval/generation clocks. Every outbound call checks cancellation
//! first (once per round-trip, cooperative) and maps collaborator errors
//! into stage errors that the technique surfaces as an `error_kind` on its
//! result, never as a panic or propagated error.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use raglab_core::trace::{preview, round4};
use raglab_core::{ErrorKind, QueryConfig, RetrievedChunk, TechniqueResult, TraceRecorder};
use raglab_index::{EmbeddingProvider, VectorIndex};
use raglab_model::{ChatModel, CompletionRequest};

/// The collaborators shared by all techniques of one deployment.
#[derive(Clone)]
pub struct TechniqueDeps {
    /// The shared vector index (read-only during a request).
    pub index: Arc<dyn VectorIndex>,
    /// The embedding client.
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// The language model client (concurrency-safe).
    pub model: Arc<dyn ChatModel>,
}

/// Request-scoped inputs handed to a technique at construction.
pub struct RunContext {
    /// Documents the retrieval is restricted to (empty = whole index).
    pub document_ids: Vec<String>,
    /// Per-query configuration with defaults applied.
    pub config: QueryConfig,
    /// The run's trace recorder; the dispatcher keeps a handle too.
    pub recorder: Arc<TraceRecorder>,
    /// Cooperative cancellation signal for the whole request.
    pub cancel: CancellationToken,
}

/// A failure inside one stage of a technique run.
#[derive(Debug)]
pub(crate) struct StageError {
    pub kind: ErrorKind,
    pub stage: &'static str,
    pub message: String,
}

impl StageError {
    pub(crate) fn new(kind: ErrorKind, stage: &'static str, message: impl Into<String>) -> Self {
        Self { kind, stage, message: message.into() }
    }
}

pub(crate) type StageResult<T> = Result<T, StageError>;

/// The successful output of a technique's internal pipeline.
pub(crate) struct Draft {
    pub answer: String,
    pub chunks: Vec<RetrievedChunk>,
}

#[derive(Default)]
struct Clocks {
    retrieval_first: Option<Instant>,
    retrieval_last: Option<Instant>,
    generation_ms: u64,
}

/// Per-run capability bundle: embed, search, complete, log.
pub(crate) struct Toolkit {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
    document_ids: Vec<String>,
    pub config: QueryConfig,
    recorder: Arc<TraceRecorder>,
    cancel: CancellationToken,
    started: Instant,
    clocks: Mutex<Clocks>,
}

impl Toolkit {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self {
            index: deps.index.clone(),
            embedder: deps.embedder.clone(),
            model: deps.model.clone(),
            document_ids: ctx.document_ids,
            config: ctx.config,
            recorder: ctx.recorder,
            cancel: ctx.cancel,
            started: Instant::now(),
            clocks: Mutex::new(Clocks::default()),
        }
    }

    /// Append a trace event.
    pub(crate) fn log(&self, step: &str, message: impl Into<String>, details: serde_json::Value) {
        self.recorder.log(step, message, details);
    }

    /// Record the `init` event every technique starts with.
    pub(crate) fn init(&self, query: &str, top_k: usize, config_keys: serde_json::Value) {
        self.log(
            "init",
            format!("query: {}", preview(query, 100)),
            json!({ "top_k": top_k, "config": config_keys }),
        );
    }

    /// Cooperative cancellation check; called once before each outbound call.
    pub(crate) fn ensure_live(&self, stage: &'static str) -> StageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StageError::new(ErrorKind::Canceled, stage, "request canceled"));
        }
        Ok(())
    }

    /// Embed a single text; failures classify as retrieval failures.
    pub(crate) async fn embed(&self, stage: &'static str, text: &str) -> StageResult<Vec<f32>> {
        self.ensure_live(stage)?;
        self.mark_retrieval_start();
        let vector = self
            .embedder
            .embed_one(text)
            .await
            .map_err(|e| StageError::new(ErrorKind::RetrievalFailed, stage, e.to_string()))?;
        self.mark_retrieval_end();
        Ok(vector)
    }

    /// Embed a batch of texts; failures classify as retrieval failures.
    pub(crate) async fn embed_batch(
        &self,
        stage: &'static str,
        texts: &[String],
    ) -> StageResult<Vec<Vec<f32>>> {
        self.ensure_live(stage)?;
        self.mark_retrieval_start();
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(|e| StageError::new(ErrorKind::RetrievalFailed, stage, e.to_string()))?;
        self.mark_retrieval_end();
        Ok(vectors)
    }

    /// Similarity-search the shared index under the request's document filter.
    pub(crate) async fn search(
        &self,
        stage: &'static str,
        query_vector: &[f32],
        k: usize,
    ) -> StageResult<Vec<RetrievedChunk>> {
        self.ensure_live(stage)?;
        self.mark_retrieval_start();
        let hits = self
            .index
            .search(query_vector, k, &self.document_ids)
            .await
            .map_err(|e| StageError::new(ErrorKind::RetrievalFailed, stage, e.to_string()))?;
        self.mark_retrieval_end();
        Ok(hits)
    }

    /// Embed `text` and search in one step.
    pub(crate) async fn retrieve(
        &self,
        stage: &'static str,
        text: &str,
        k: usize,
    ) -> StageResult<Vec<RetrievedChunk>> {
        let vector = self.embed(stage, text).await?;
        self.search(stage, &vector, k).await
    }

    /// Run one completion. Any model failure — including a per-call
    /// timeout — is a stage-level `llm_failed`, never a whole-technique
    /// timeout.
    pub(crate) async fn complete(
        &self,
        stage: &'static str,
        request: CompletionRequest,
    ) -> StageResult<String> {
        self.ensure_live(stage)?;
        self.model
            .complete(&request)
            .await
            .map_err(|e| StageError::new(ErrorKind::LlmFailed, stage, e.to_string()))
    }

    /// Record the `retrieve_complete` event for the final context.
    pub(crate) fn retrieve_complete(&self, chunks: &[RetrievedChunk]) {
        let top_scores: Vec<f64> = chunks.iter().take(3).map(|c| round4(c.score)).collect();
        self.log(
            "retrieve_complete",
            format!("{} chunk(s) in final context", chunks.len()),
            json!({ "result_count": chunks.len(), "top_scores": top_scores }),
        );
    }

    /// Produce the final answer from the assembled context, with the
    /// standard generation trace events and the generation clock.
    pub(crate) async fn generate(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
    ) -> StageResult<String> {
        let system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| crate::prompts::ANSWER_SYSTEM.to_string());
        let user = crate::prompts::answer_user(query, chunks);

        self.log(
            "generate_prepare_context",
            "assembling generation context",
            json!({
                "doc_count": chunks.len(),
                "total_context_length": chunks.iter().map(|c| c.text.len()).sum::<usize>(),
            }),
        );
        let request = CompletionRequest::new(system, user).temperature(0.2).max_tokens(2000);
        self.generate_with("generate", request).await
    }

    /// Run an arbitrary request as the answer-producing completion,
    /// timing it into the generation clock.
    pub(crate) async fn generate_with(
        &self,
        stage: &'static str,
        request: CompletionRequest,
    ) -> StageResult<String> {
        self.log("generate_llm_call", "calling the model for the final answer", json!({}));
        let call_started = Instant::now();
        let answer = self.complete(stage, request).await?;
        self.set_generation_ms(call_started.elapsed().as_millis() as u64);
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(StageError::new(ErrorKind::LlmFailed, stage, "empty completion"));
        }
        self.log(
            "generate_complete",
            "answer generated",
            json!({
                "answer_length": answer.chars().count(),
                "answer_preview": preview(&answer, 150),
            }),
        );
        Ok(answer)
    }

    /// Overwrite the generation clock (used when the answer is chosen among
    /// several timed candidates).
    pub(crate) fn set_generation_ms(&self, ms: u64) {
        self.clocks.lock().expect("clock poisoned").generation_ms = ms;
    }

    fn mark_retrieval_start(&self) {
        let mut clocks = self.clocks.lock().expect("clock poisoned");
        if clocks.retrieval_first.is_none() {
            clocks.retrieval_first = Some(Instant::now());
        }
    }

    fn mark_retrieval_end(&self) {
        self.clocks.lock().expect("clock poisoned").retrieval_last = Some(Instant::now());
    }

    /// Convert the pipeline outcome into the run's [`TechniqueResult`].
    ///
    /// On failure the trace gains a `<stage>_error` event, the answer stays
    /// empty and `error_kind` is set — the contract is that a technique
    /// always returns a result, never an error.
    pub(crate) fn finish(&self, name: &str, outcome: StageResult<Draft>) -> TechniqueResult {
        let clocks = self.clocks.lock().expect("clock poisoned");
        let retrieval_time_ms = match (clocks.retrieval_first, clocks.retrieval_last) {
            (Some(first), Some(last)) => last.duration_since(first).as_millis() as u64,
            _ => 0,
        };
        let generation_time_ms = clocks.generation_ms;
        drop(clocks);

        let (answer, chunks, error_kind) = match outcome {
            Ok(draft) => (draft.answer, draft.chunks, None),
            Err(e) => {
                warn!(technique = name, stage = e.stage, kind = %e.kind, "technique run failed");
                self.log(
                    &format!("{}_error", e.stage),
                    e.message.clone(),
                    json!({ "error_kind": e.kind.as_str() }),
                );
                (String::new(), Vec::new(), Some(e.kind))
            }
        };

        TechniqueResult {
            technique_name: name.to_string(),
            answer,
            retrieved_chunks: chunks,
            trace: self.recorder.snapshot(),
            retrieval_time_ms,
            generation_time_ms,
            total_time_ms: self.started.elapsed().as_millis() as u64,
            error_kind,
        }
    }
}

/// Min-max normalize `values` into [0, 1]; a degenerate range maps the
/// minimum to 0 and divides by 1 (matching the fusion contract).
pub(crate) fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = if (max - min).abs() < f64::EPSILON { 1.0 } else { max - min };
    values.iter().map(|v| (v - min) / range).collect()
}
