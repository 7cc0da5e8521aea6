//! Self-reflective RAG: retrieval decision, relevance filtering and
//! candidate answer self-evaluation.
//!
//! (a) One call decides whether retrieval is needed at all; a "no" answers
//! from the model alone with an empty context. (b) Retrieved chunks are
//! labeled fully/partially/not relevant and the not-relevant ones dropped.
//! (c) Two candidate answers at temperature 0.7 are scored on support
//! (fully/partially/none → 3/1/0) and utility (1–5); composite
//! `5·support + utility`, max wins, ties go to the shorter answer.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use raglab_core::parse::first_number_in;
use raglab_core::trace::preview;
use raglab_core::{ErrorKind, RetrievedChunk, TechniqueResult};
use raglab_model::CompletionRequest;

use crate::prompts;
use crate::technique::Technique;
use crate::toolkit::{Draft, RunContext, StageError, StageResult, TechniqueDeps, Toolkit};

/// Number of candidate answers generated in the self-evaluation stage.
const NUM_CANDIDATES: usize = 2;

pub struct SelfReflective {
    tk: Toolkit,
}

struct Candidate {
    answer: String,
    composite: i64,
    generation_ms: u64,
}

impl SelfReflective {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn needs_retrieval(&self, query: &str) -> StageResult<bool> {
        let request = CompletionRequest::new(
            prompts::RETRIEVAL_DECISION_SYSTEM,
            prompts::retrieval_decision_user(query),
        )
        .max_tokens(8);
        match self.tk.complete("retrieval_decision", request).await {
            Ok(reply) => Ok(reply.to_lowercase().contains("yes")),
            Err(e) if e.kind == ErrorKind::Canceled => Err(e),
            // Failing open keeps the grounded path available.
            Err(_) => Ok(true),
        }
    }

    async fn filter_relevant(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
    ) -> StageResult<Vec<RetrievedChunk>> {
        let total = candidates.len();
        let mut relevant = Vec::with_capacity(total);
        for candidate in candidates {
            let request = CompletionRequest::new(
                prompts::RELEVANCE_SYSTEM,
                prompts::relevance_user(query, &candidate.text),
            )
            .max_tokens(16);
            let keep = match self.tk.complete("relevance_filter", request).await {
                Ok(reply) => !reply.to_lowercase().contains("not_relevant"),
                Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
                // Labeling failure keeps the chunk; dropping evidence on a
                // judge error would starve generation.
                Err(_) => true,
            };
            if keep {
                relevant.push(candidate);
            }
        }
        self.tk.log(
            "relevance_filter",
            format!("kept {} of {} chunk(s)", relevant.len(), total),
            json!({ "kept": relevant.len(), "dropped": total - relevant.len() }),
        );
        Ok(relevant)
    }

    async fn support_score(&self, answer: &str, context: &str) -> StageResult<i64> {
        let request =
            CompletionRequest::new(prompts::SUPPORT_SYSTEM, prompts::support_user(answer, context))
                .max_tokens(16);
        match self.tk.complete("self_rag_support", request).await {
            Ok(reply) => {
                let lower = reply.to_lowercase();
                if lower.contains("fully") {
                    Ok(3)
                } else if lower.contains("partially") {
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            Err(e) if e.kind == ErrorKind::Canceled => Err(e),
            Err(_) => Ok(1),
        }
    }

    async fn utility_score(&self, query: &str, answer: &str) -> StageResult<i64> {
        let request =
            CompletionRequest::new(prompts::UTILITY_SYSTEM, prompts::utility_user(query, answer))
                .max_tokens(8);
        match self.tk.complete("self_rag_utility", request).await {
            Ok(reply) => Ok(first_number_in(&reply, 1.0, 5.0).map(|v| v as i64).unwrap_or(3)),
            Err(e) if e.kind == ErrorKind::Canceled => Err(e),
            Err(_) => Ok(3),
        }
    }

    async fn direct_answer(&self, query: &str) -> StageResult<String> {
        self.tk.log(
            "generate_prepare_context",
            "answering without retrieval",
            json!({ "doc_count": 0, "total_context_length": 0 }),
        );
        let request = CompletionRequest::new(
            prompts::DIRECT_ANSWER_SYSTEM,
            prompts::direct_answer_user(query),
        )
        .temperature(0.2)
        .max_tokens(1000);
        self.tk.generate_with("generate", request).await
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let retrieve = self.needs_retrieval(query).await?;
        self.tk.log(
            "retrieval_decision",
            if retrieve { "retrieval needed: yes" } else { "retrieval needed: no" },
            json!({ "retrieve": retrieve }),
        );

        if !retrieve {
            let answer = self.direct_answer(query).await?;
            return Ok(Draft { answer, chunks: Vec::new() });
        }

        self.tk.log("retrieve_prepare", "similarity search", json!({ "k": top_k }));
        let candidates: Vec<_> = self
            .tk
            .retrieve("retrieve", query, top_k)
            .await?
            .into_iter()
            .map(|c| {
                let vector_score = c.score;
                c.with_sub_score("vector_score", vector_score)
            })
            .collect();
        let relevant = self.filter_relevant(query, candidates).await?;
        self.tk.retrieve_complete(&relevant);

        let context: String =
            relevant.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");

        self.tk.log(
            "generate_prepare_context",
            "assembling generation context",
            json!({
                "doc_count": relevant.len(),
                "total_context_length": context.len(),
            }),
        );

        let mut best: Option<Candidate> = None;
        for i in 0..NUM_CANDIDATES {
            self.tk.log(
                "generate_llm_call",
                format!("candidate answer {} of {NUM_CANDIDATES}", i + 1),
                json!({ "candidate": i + 1 }),
            );
            let request = CompletionRequest::new(
                prompts::DIRECT_ANSWER_SYSTEM,
                prompts::grounded_candidate_user(query, &context),
            )
            .temperature(0.7)
            .max_tokens(1000);

            let started = Instant::now();
            let answer = match self.tk.complete("self_rag_generate", request).await {
                Ok(text) => text.trim().to_string(),
                Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
                Err(e) => {
                    self.tk.log(
                        "self_rag_generate_fallback",
                        format!("candidate {} failed: {}", i + 1, e.message),
                        json!({ "candidate": i + 1 }),
                    );
                    continue;
                }
            };
            let generation_ms = started.elapsed().as_millis() as u64;
            if answer.is_empty() {
                continue;
            }

            let support = self.support_score(&answer, &context).await?;
            let utility = self.utility_score(query, &answer).await?;
            let composite = 5 * support + utility;
            self.tk.log(
                "self_rag_answer_eval",
                format!("candidate {}: support={support} utility={utility}", i + 1),
                json!({
                    "candidate": i + 1,
                    "support": support,
                    "utility": utility,
                    "composite": composite,
                    "answer_preview": preview(&answer, 150),
                }),
            );

            let better = match &best {
                None => true,
                Some(current) => {
                    composite > current.composite
                        || (composite == current.composite
                            && answer.chars().count() < current.answer.chars().count())
                }
            };
            if better {
                best = Some(Candidate { answer, composite, generation_ms });
            }
        }

        let Some(chosen) = best else {
            return Err(StageError::new(
                ErrorKind::LlmFailed,
                "self_rag_generate",
                "no candidate answer could be generated",
            ));
        };

        // All candidates scored below the acceptance floor: answer directly.
        if chosen.composite < self.tk.config.min_support_score {
            self.tk.log(
                "self_rag_answer_eval",
                format!("best composite {} below floor, answering directly", chosen.composite),
                json!({ "composite": chosen.composite }),
            );
            let answer = self.direct_answer(query).await?;
            return Ok(Draft { answer, chunks: relevant });
        }

        self.tk.set_generation_ms(chosen.generation_ms);
        self.tk.log(
            "generate_complete",
            "candidate selected",
            json!({
                "answer_length": chosen.answer.chars().count(),
                "answer_preview": preview(&chosen.answer, 150),
                "composite": chosen.composite,
            }),
        );
        Ok(Draft { answer: chosen.answer, chunks: relevant })
    }
}

#[async_trait]
impl Technique for SelfReflective {
    fn name(&self) -> &'static str {
        "self_reflective"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(
            query,
            top_k,
            json!({ "min_support_score": self.tk.config.min_support_score }),
        );
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
