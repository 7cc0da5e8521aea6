//! Isolated execution workers for the reference-metric evaluator.
//!
//! Each worker is a dedicated OS thread owning a private current-thread
//! tokio runtime, reused across calls and fed over a channel. Jobs are
//! serialized per worker; the pool round-robins across workers. The
//! per-evaluation timeout is enforced inside the worker's own runtime so a
//! wedged evaluation can never block the host scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{EvalError, Result};
use crate::reference::{ReferenceMetricsEvaluator, ReferenceReport};

/// Default per-evaluation budget inside a worker.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// One evaluation request handed to the pool.
#[derive(Debug, Clone)]
pub struct ReferenceJob {
    /// The original user query.
    pub query: String,
    /// The generated answer under evaluation.
    pub answer: String,
    /// The contexts the answer was grounded on.
    pub contexts: Vec<String>,
    /// Optional reference answer enabling the context metrics.
    pub reference: Option<String>,
}

struct Envelope {
    job: ReferenceJob,
    reply: oneshot::Sender<Result<ReferenceReport>>,
}

/// A pool of isolation workers for reference evaluations.
pub struct ReferenceWorkerPool {
    senders: Vec<mpsc::Sender<Envelope>>,
    next: AtomicUsize,
}

impl ReferenceWorkerPool {
    /// Spawn `size` workers (at least one) sharing the evaluator.
    pub fn new(evaluator: Arc<ReferenceMetricsEvaluator>, size: usize, timeout: Duration) -> Self {
        let size = size.max(1);
        let mut senders = Vec::with_capacity(size);
        for worker_id in 0..size {
            let (sender, receiver) = mpsc::channel::<Envelope>();
            let evaluator = evaluator.clone();
            std::thread::Builder::new()
                .name(format!("raglab-eval-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, evaluator, timeout))
                .expect("failed to spawn evaluation worker");
            senders.push(sender);
        }
        Self { senders, next: AtomicUsize::new(0) }
    }

    /// Submit a job and await its report from the host runtime.
    ///
    /// The await happens on a oneshot channel, so the host scheduler never
    /// drives the evaluation future itself.
    pub async fn evaluate(&self, job: ReferenceJob) -> Result<ReferenceReport> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let (reply, response) = oneshot::channel();
        self.senders[slot]
            .send(Envelope { job, reply })
            .map_err(|_| EvalError::WorkerGone)?;
        response.await.map_err(|_| EvalError::WorkerGone)?
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.senders.len()
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: mpsc::Receiver<Envelope>,
    evaluator: Arc<ReferenceMetricsEvaluator>,
    timeout: Duration,
) {
    // The worker's private scheduler, reused across jobs.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id, error = %e, "evaluation worker failed to build its runtime");
            return;
        }
    };

    while let Ok(Envelope { job, reply }) = receiver.recv() {
        debug!(worker_id, "evaluation job received");
        let result = runtime.block_on(async {
            match tokio::time::timeout(
                timeout,
                evaluator.evaluate(
                    &job.query,
                    &job.answer,
                    &job.contexts,
                    job.reference.as_deref(),
                ),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EvalError::Timeout(timeout)),
            }
        });
        // A dropped receiver just means the caller gave up waiting.
        let _ = reply.send(result);
    }
    debug!(worker_id, "evaluation worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raglab_index::{EmbeddingProvider, IndexError};
    use raglab_model::{ChatModel, CompletionRequest, ModelError};

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ModelError> {
            if request.system.contains("atomic factual claims") {
                Ok("1. The sky is blue.".into())
            } else if request.system.contains("reverse-engineer") {
                Ok("1. What color is the sky?".into())
            } else {
                Ok("yes".into())
            }
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, IndexError> {
            Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    fn pool(size: usize) -> ReferenceWorkerPool {
        let evaluator = Arc::new(ReferenceMetricsEvaluator::new(
            Arc::new(EchoModel),
            Arc::new(UnitEmbedder),
        ));
        ReferenceWorkerPool::new(evaluator, size, Duration::from_secs(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn evaluations_run_off_the_host_runtime() {
        let pool = pool(2);
        let job = ReferenceJob {
            query: "What color is the sky?".into(),
            answer: "The sky is blue.".into(),
            contexts: vec!["The sky is blue on clear days.".into()],
            reference: None,
        };
        let report = pool.evaluate(job).await.unwrap();
        assert_eq!(report.faithfulness, 1.0);
        assert!(report.answer_relevancy > 0.99);
    }

    /// Back-to-back evaluations must not wedge the host: unrelated tasks
    /// keep being served throughout.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn host_runtime_stays_responsive_under_repeated_evaluations() {
        let pool = Arc::new(pool(2));

        let heartbeat = tokio::spawn(async {
            let mut beats = 0u32;
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                beats += 1;
            }
            beats
        });

        for _ in 0..10 {
            let job = ReferenceJob {
                query: "q".into(),
                answer: "The sky is blue.".into(),
                contexts: vec!["The sky is blue.".into()],
                reference: None,
            };
            pool.evaluate(job).await.unwrap();
        }

        let beats = heartbeat.await.unwrap();
        assert_eq!(beats, 20, "host runtime heartbeat stalled");
    }

    #[test]
    fn pool_size_has_a_floor_of_one() {
        let pool = pool(0);
        assert_eq!(pool.size(), 1);
    }
}
