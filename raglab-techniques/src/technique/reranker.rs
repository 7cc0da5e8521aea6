//! Wide retrieval followed by point-wise LLM reranking.
//!
//! Retrieves a candidate pool of `rerank_candidates` (default `4·top_k`,
//! floor 20), scores each candidate against the query on a 0–10 scale with
//! the LLM, and keeps the top `top_k` by rerank score with the original
//! vector score as tie-breaker. A candidate whose scoring call fails keeps
//! its vector score min-max-normalized onto the 0–10 scale.

use async_trait::async_trait;
use serde_json::json;

use raglab_core::parse::first_number_in;
use raglab_core::trace::round4;
use raglab_core::{ErrorKind, TechniqueResult};
use raglab_model::CompletionRequest;

use crate::prompts;
use crate::technique::Technique;
use crate::toolkit::{min_max_normalize, Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

pub struct Reranker {
    tk: Toolkit,
}

impl Reranker {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let pool = self.tk.config.rerank_pool(top_k);
        self.tk.log("retrieve_prepare", "wide candidate retrieval", json!({ "k": pool }));
        let candidates = self.tk.retrieve("retrieve", query, pool).await?;

        if candidates.is_empty() {
            self.tk.retrieve_complete(&candidates);
            let answer = self.tk.generate(query, &candidates).await?;
            return Ok(Draft { answer, chunks: candidates });
        }

        // Fallback scale for candidates whose scorer call fails: the vector
        // score distribution stretched onto 0-10.
        let vector_scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
        let fallback: Vec<f64> =
            min_max_normalize(&vector_scores).into_iter().map(|v| v * 10.0).collect();

        let mut scored = Vec::with_capacity(candidates.len());
        let mut fallback_count = 0usize;
        for (i, candidate) in candidates.into_iter().enumerate() {
            let request = CompletionRequest::new(
                prompts::RERANK_SYSTEM,
                prompts::rerank_user(query, &candidate.text),
            )
            .max_tokens(16);

            let rerank_score = match self.tk.complete("rerank", request).await {
                Ok(reply) => match first_number_in(&reply, 0.0, 10.0) {
                    Some(score) => score,
                    None => {
                        fallback_count += 1;
                        self.tk.log(
                            "rerank_score_fallback",
                            format!("unparseable scorer reply for {}", candidate.chunk_id),
                            json!({ "chunk_id": candidate.chunk_id, "fallback": fallback[i] }),
                        );
                        fallback[i]
                    }
                },
                Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
                Err(e) => {
                    fallback_count += 1;
                    self.tk.log(
                        "rerank_score_fallback",
                        format!("scorer failed for {}: {}", candidate.chunk_id, e.message),
                        json!({ "chunk_id": candidate.chunk_id, "fallback": fallback[i] }),
                    );
                    fallback[i]
                }
            };

            let vector_score = vector_scores[i];
            scored.push(
                candidate.with_sub_score("vector_score", vector_score).with_sub_score(
                    "rerank_score",
                    rerank_score,
                ),
            );
        }

        // Rerank score descending; ties fall back to the vector score.
        scored.sort_by(|a, b| {
            let ra = a.sub_scores["rerank_score"];
            let rb = b.sub_scores["rerank_score"];
            rb.partial_cmp(&ra)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let va = a.sub_scores["vector_score"];
                    let vb = b.sub_scores["vector_score"];
                    vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        scored.truncate(top_k);
        for chunk in &mut scored {
            chunk.score = chunk.sub_scores["rerank_score"];
        }

        self.tk.log(
            "rerank_after",
            format!("reranked {} candidate(s)", scored.len()),
            json!({
                "kept": scored.len(),
                "scorer_fallbacks": fallback_count,
                "top_rerank_scores":
                    scored.iter().take(3).map(|c| round4(c.score)).collect::<Vec<_>>(),
            }),
        );
        self.tk.retrieve_complete(&scored);

        let answer = self.tk.generate(query, &scored).await?;
        Ok(Draft { answer, chunks: scored })
    }
}

#[async_trait]
impl Technique for Reranker {
    fn name(&self) -> &'static str {
        "reranker"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(
            query,
            top_k,
            json!({ "rerank_candidates": self.tk.config.rerank_pool(top_k) }),
        );
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
