//! End-to-end fan-out scenarios against scripted collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use raglab_core::{Chunk, EmbeddedChunk, ErrorKind, QueryConfig};
use raglab_index::{EmbeddingProvider, InMemoryVectorIndex, IndexError, VectorIndex};
use raglab_model::{ChatModel, CompletionRequest, ModelError};
use raglab_techniques::{FanoutDispatcher, FanoutError, FanoutRequest, TechniqueDeps};

// ── Scripted collaborators ─────────────────────────────────────────

/// Embedder with fixed vectors per known text and a deterministic
/// hash-based fallback.
struct StaticEmbedder {
    dimensions: usize,
    known: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    fn new(dimensions: usize) -> Self {
        Self { dimensions, known: HashMap::new() }
    }

    fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions);
        self.known.insert(text.to_string(), vector);
        self
    }

    fn fallback(&self, text: &str) -> Vec<f32> {
        let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let mut v: Vec<f32> =
            (0..self.dimensions).map(|i| ((hash.wrapping_add(i as u64)) as f32).sin()).collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts
            .iter()
            .map(|t| self.known.get(t).cloned().unwrap_or_else(|| self.fallback(t)))
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

type Script = Box<dyn Fn(&CompletionRequest) -> Result<String, ModelError> + Send + Sync>;

/// Model with a per-call delay, a scripted reply and concurrency tracking.
struct ScriptedModel {
    delay: Duration,
    script: Script,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    fn answering(answer: &str) -> Self {
        let answer = answer.to_string();
        Self::scripted(Duration::ZERO, move |_| Ok(answer.clone()))
    }

    fn scripted(
        delay: Duration,
        script: impl Fn(&CompletionRequest) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay,
            script: Box::new(script),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.script)(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

const Q_CAPITAL: &str = "What is the capital of France?";
const C1: &str = "Paris is the capital of France.";
const C2: &str = "Berlin is in Germany.";
const C3: &str = "The Seine runs through Paris.";

async fn france_index(embedder: &StaticEmbedder) -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new(3));
    let texts = [C1, C2, C3];
    let embedded: Vec<EmbeddedChunk> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| EmbeddedChunk {
            chunk: Chunk::new("doc", i as u32, *text, HashMap::new()),
            embedding: embedder.known[*text].clone(),
        })
        .collect();
    index.upsert(embedded).await.unwrap();
    index
}

fn france_embedder() -> StaticEmbedder {
    StaticEmbedder::new(3)
        .with(Q_CAPITAL, vec![1.0, 0.0, 0.0])
        .with(C1, vec![0.95, 0.1, 0.0])
        .with(C2, vec![0.0, 1.0, 0.0])
        .with(C3, vec![0.8, 0.3, 0.0])
}

fn deps(
    index: Arc<InMemoryVectorIndex>,
    embedder: StaticEmbedder,
    model: Arc<ScriptedModel>,
) -> TechniqueDeps {
    TechniqueDeps { index, embedder: Arc::new(embedder), model }
}

fn request(techniques: &[&str], config: QueryConfig) -> FanoutRequest {
    FanoutRequest {
        query: Q_CAPITAL.to_string(),
        document_ids: vec!["doc".to_string()],
        technique_names: techniques.iter().map(|s| s.to_string()).collect(),
        config,
    }
}

// ── Scenarios ──────────────────────────────────────────────────────

/// Baseline happy path: top-2 retrieval order, grounded answer, trace shape.
#[tokio::test]
async fn baseline_happy_path() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::answering(
        "According to the documents, Paris is the capital of France.",
    ));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let config = QueryConfig { top_k: 2, ..QueryConfig::default() };
    let outcome = dispatcher
        .run("session-1", request(&["baseline"], config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];
    assert!(result.is_success());
    assert!(result.answer.contains("Paris"));

    let ids: Vec<&str> = result.retrieved_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["doc_0", "doc_2"], "expected [c1, c3] in that order");

    let retrieve_complete = result
        .trace
        .iter()
        .find(|e| e.step == "retrieve_complete")
        .expect("retrieve_complete event");
    assert_eq!(retrieve_complete.details["result_count"], 2);

    // Sequence numbers are strictly monotonic from zero.
    for (i, event) in result.trace.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
    }
}

/// Output order equals input order regardless of finish order.
#[tokio::test]
async fn fanout_preserves_input_order() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    // hyde makes two model calls, baseline one: baseline finishes first.
    let model = Arc::new(ScriptedModel::scripted(Duration::from_millis(50), |_| {
        Ok("Paris, per the documents.".to_string())
    }));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let config = QueryConfig { top_k: 2, ..QueryConfig::default() };
    let outcome = dispatcher
        .run("session-1", request(&["hyde", "fusion", "baseline"], config), CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<&str> = outcome.results.iter().map(|r| r.technique_name.as_str()).collect();
    assert_eq!(names, vec!["hyde", "fusion", "baseline"]);
    assert!(outcome.all_succeeded());
}

/// A slow technique times out without aborting its fast sibling.
#[tokio::test]
async fn timeout_is_isolated_per_technique() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    // Every model call takes 60 ms. Baseline needs one call and fits in the
    // 250 ms budget; self_reflective needs several and cannot.
    let model = Arc::new(ScriptedModel::scripted(Duration::from_millis(60), |req| {
        if req.user.contains("require document retrieval") {
            Ok("yes".to_string())
        } else {
            Ok("A grounded answer about Paris.".to_string())
        }
    }));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let config = QueryConfig {
        top_k: 2,
        per_technique_timeout: Duration::from_millis(250),
        ..QueryConfig::default()
    };
    let outcome = dispatcher
        .run("session-1", request(&["baseline", "self_reflective"], config), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.results[0].is_success(), "baseline must not be aborted");
    let slow = &outcome.results[1];
    assert_eq!(slow.error_kind, Some(ErrorKind::Timeout));
    assert!(slow.answer.is_empty());
    assert!(!slow.trace.is_empty(), "partial trace is preserved on timeout");
}

/// Self-reflective answers without retrieval when the decision is "no".
#[tokio::test]
async fn self_reflective_skips_retrieval_on_no() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::scripted(Duration::ZERO, |req| {
        if req.user.contains("require document retrieval") {
            Ok("No".to_string())
        } else {
            Ok("I am a question answering assistant.".to_string())
        }
    }));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let mut fanout_request = request(&["self_reflective"], QueryConfig::default());
    fanout_request.query = "Hello, who are you?".to_string();
    let outcome =
        dispatcher.run("session-1", fanout_request, CancellationToken::new()).await.unwrap();

    let result = &outcome.results[0];
    assert!(result.is_success());
    assert!(!result.answer.is_empty());
    assert!(result.retrieved_chunks.is_empty());

    let decision = result
        .trace
        .iter()
        .find(|e| e.step.contains("retrieval_decision"))
        .expect("retrieval_decision event");
    assert_eq!(decision.details["retrieve"], false);
}

/// Fusion ranks the chunk matching both lexically and semantically first.
#[tokio::test]
async fn fusion_prefers_the_doubly_matching_chunk() {
    let query = "solar panel efficiency";
    let lexical_only = "solar panel efficiency data tables";
    let semantic_only = "photovoltaic module performance study";
    let both = "solar panel efficiency in photovoltaic modules";

    let embedder = StaticEmbedder::new(2)
        .with(query, vec![1.0, 0.0])
        .with(lexical_only, vec![0.0, 1.0])
        .with(semantic_only, vec![0.99, 0.1])
        .with(both, vec![0.9, 0.2]);

    let index = Arc::new(InMemoryVectorIndex::new(2));
    let texts = [lexical_only, semantic_only, both];
    index
        .upsert(
            texts
                .iter()
                .enumerate()
                .map(|(i, text)| EmbeddedChunk {
                    chunk: Chunk::new("doc", i as u32, *text, HashMap::new()),
                    embedding: embedder.known[*text].clone(),
                })
                .collect(),
        )
        .await
        .unwrap();

    let model = Arc::new(ScriptedModel::answering("Grounded answer."));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let mut fanout_request = request(&["fusion"], QueryConfig { top_k: 3, ..Default::default() });
    fanout_request.query = query.to_string();
    let outcome =
        dispatcher.run("session-1", fanout_request, CancellationToken::new()).await.unwrap();

    let result = &outcome.results[0];
    assert!(result.is_success());
    assert_eq!(result.retrieved_chunks[0].text, both, "both-matching chunk must rank first");
    assert!(result.trace.iter().any(|e| e.step == "fusion_merge"));
}

/// Unknown technique names reject the whole request.
#[tokio::test]
async fn unknown_technique_rejects_the_request() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::answering("unused"));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let err = dispatcher
        .run(
            "session-1",
            request(&["baseline", "simple_rag"], QueryConfig::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::UnknownTechnique(name) if name == "simple_rag"));
}

/// At most `max_concurrency` workers hold an outbound model call at once.
#[tokio::test]
async fn concurrency_bound_is_respected() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::scripted(Duration::from_millis(40), |_| {
        Ok("Paris.".to_string())
    }));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, Arc::clone(&model)));

    let config = QueryConfig { top_k: 2, max_concurrency: 2, ..QueryConfig::default() };
    let names = vec!["baseline"; 5];
    let outcome = dispatcher
        .run("session-1", request(&names, config), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 5);
    assert!(outcome.all_succeeded());
    assert!(
        model.peak_concurrency() <= 2,
        "peak concurrency {} exceeded the bound",
        model.peak_concurrency()
    );
}

/// A pre-canceled request yields canceled results with their traces.
#[tokio::test]
async fn cancellation_is_observed_before_outbound_calls() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::answering("unused"));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = dispatcher
        .run("session-1", request(&["baseline", "fusion"], QueryConfig::default()), cancel)
        .await
        .unwrap();

    for result in &outcome.results {
        assert_eq!(result.error_kind, Some(ErrorKind::Canceled));
        assert!(result.trace.iter().any(|e| e.step == "init"), "trace so far is kept");
    }
}

/// top_k = 0 still generates, with an empty final context.
#[tokio::test]
async fn top_k_zero_generates_from_empty_context() {
    let embedder = france_embedder();
    let index = france_index(&embedder).await;
    let model = Arc::new(ScriptedModel::answering("I could not find documents for this."));
    let dispatcher = FanoutDispatcher::new(deps(index, embedder, model));

    let config = QueryConfig { top_k: 0, ..QueryConfig::default() };
    let outcome = dispatcher
        .run("session-1", request(&["baseline"], config), CancellationToken::new())
        .await
        .unwrap();

    let result = &outcome.results[0];
    assert!(result.is_success());
    assert!(result.retrieved_chunks.is_empty());
    assert!(!result.answer.is_empty());
}
