//! The fan-out dispatcher: one query, many techniques, bounded concurrency.
//!
//! Results come back in the input order of `technique_names` regardless of
//! finish order. Failures never cross the dispatcher boundary — a timed-out
//! or panicked worker becomes a `TechniqueResult` with the matching
//! `error_kind` and whatever trace the run managed to record.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use raglab_core::{ErrorKind, QueryConfig, TechniqueResult, TraceRecorder};

use crate::registry::TechniqueRegistry;
use crate::toolkit::{RunContext, TechniqueDeps};

/// One fan-out request.
#[derive(Debug, Clone)]
pub struct FanoutRequest {
    /// The user query.
    pub query: String,
    /// Documents retrieval is restricted to (empty = whole index).
    pub document_ids: Vec<String>,
    /// Techniques to run, in output order.
    pub technique_names: Vec<String>,
    /// Per-query configuration.
    pub config: QueryConfig,
}

/// The aggregated outcome of one fan-out.
#[derive(Debug)]
pub struct FanoutOutcome {
    /// One result per requested technique, in request order.
    pub results: Vec<TechniqueResult>,
    /// Row ids of the persisted QA records; empty when no sink is attached
    /// or persistence failed.
    pub qa_record_ids: Vec<i64>,
    /// Set when the sink write failed; the results are still valid.
    pub persistence_failed: bool,
}

impl FanoutOutcome {
    /// Whether every technique completed without an error kind.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(TechniqueResult::is_success)
    }
}

/// Request-level failures that reject the fan-out before execution.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// A requested technique name is not in the registry.
    #[error("unknown technique: {0}")]
    UnknownTechnique(String),
}

/// Boxed error for the persistence seam.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Where the dispatcher writes QA records after a fan-out.
///
/// The whole batch for one fan-out is written in a single transaction.
#[async_trait]
pub trait QaRecordSink: Send + Sync {
    /// Persist one QA record per result, returning the new row ids in
    /// result order.
    async fn record_fanout(
        &self,
        session_id: &str,
        query: &str,
        results: &[TechniqueResult],
    ) -> Result<Vec<i64>, SinkError>;
}

/// Bounded-concurrency executor for techniques-per-query.
pub struct FanoutDispatcher {
    deps: TechniqueDeps,
    sink: Option<Arc<dyn QaRecordSink>>,
}

impl FanoutDispatcher {
    /// Create a dispatcher without persistence.
    pub fn new(deps: TechniqueDeps) -> Self {
        Self { deps, sink: None }
    }

    /// Attach a persistence sink.
    pub fn with_sink(mut self, sink: Arc<dyn QaRecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run every requested technique against the query and aggregate the
    /// results in input order.
    pub async fn run(
        &self,
        session_id: &str,
        request: FanoutRequest,
        cancel: CancellationToken,
    ) -> Result<FanoutOutcome, FanoutError> {
        // Unknown names reject the request before any execution.
        for name in &request.technique_names {
            if !TechniqueRegistry::contains(name) {
                return Err(FanoutError::UnknownTechnique(name.clone()));
            }
        }

        let semaphore = Arc::new(Semaphore::new(request.config.max_concurrency));
        let timeout = request.config.per_technique_timeout;
        let query = Arc::<str>::from(request.query.as_str());
        let top_k = request.config.top_k;

        let mut workers = Vec::with_capacity(request.technique_names.len());
        for name in &request.technique_names {
            let recorder = Arc::new(TraceRecorder::new());
            let ctx = RunContext {
                document_ids: request.document_ids.clone(),
                config: request.config.clone(),
                recorder: recorder.clone(),
                cancel: cancel.child_token(),
            };
            // Names were validated above; construct cannot fail here.
            let technique = TechniqueRegistry::construct(name, &self.deps, ctx)
                .expect("validated technique name");

            let semaphore = semaphore.clone();
            let query = query.clone();
            let worker_recorder = recorder.clone();
            let worker_name = name.clone();
            let handle = tokio::spawn(async move {
                let _permit =
                    semaphore.acquire_owned().await.expect("fan-out semaphore closed early");
                let started = Instant::now();
                match tokio::time::timeout(timeout, technique.answer(&query, top_k)).await {
                    Ok(result) => result,
                    Err(_) => {
                        worker_recorder.log(
                            "technique_timeout",
                            format!("exceeded the {timeout:?} budget"),
                            json!({ "timeout_ms": timeout.as_millis() as u64 }),
                        );
                        fault_result(
                            &worker_name,
                            &worker_recorder,
                            ErrorKind::Timeout,
                            started.elapsed().as_millis() as u64,
                        )
                    }
                }
            });
            workers.push((name.clone(), recorder, handle));
        }

        let mut results = Vec::with_capacity(workers.len());
        for (name, recorder, handle) in workers {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    // A worker that fails to return at all is a bug, not a
                    // technique failure.
                    error!(technique = %name, error = %join_error, "technique worker died");
                    fault_result(&name, &recorder, ErrorKind::InternalError, 0)
                }
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            techniques = results.len(),
            failed,
            canceled = cancel.is_cancelled(),
            "fan-out complete"
        );

        let (qa_record_ids, persistence_failed) = match &self.sink {
            Some(sink) => match sink.record_fanout(session_id, &request.query, &results).await {
                Ok(ids) => (ids, false),
                Err(e) => {
                    warn!(error = %e, "fan-out persistence failed; returning results anyway");
                    (Vec::new(), true)
                }
            },
            None => (Vec::new(), false),
        };

        Ok(FanoutOutcome { results, qa_record_ids, persistence_failed })
    }
}

/// Build the result for a worker that did not produce one itself.
fn fault_result(
    name: &str,
    recorder: &TraceRecorder,
    kind: ErrorKind,
    total_time_ms: u64,
) -> TechniqueResult {
    TechniqueResult {
        technique_name: name.to_string(),
        answer: String::new(),
        retrieved_chunks: Vec::new(),
        trace: recorder.snapshot(),
        retrieval_time_ms: 0,
        generation_time_ms: 0,
        total_time_ms,
        error_kind: Some(kind),
    }
}
