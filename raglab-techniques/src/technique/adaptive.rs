//! Query-class routing with a per-class retrieval strategy.
//!
//! One classification call buckets the query into factual / analytical /
//! opinion / contextual, then dispatches: factual rewrites before
//! retrieving, analytical decomposes into three sub-queries, opinion
//! retrieves with a diversity bias, contextual runs the baseline path.

use async_trait::async_trait;
use serde_json::json;

use raglab_core::{ErrorKind, RetrievedChunk, TechniqueResult};
use raglab_index::inmemory::cosine_similarity;
use raglab_model::CompletionRequest;

use crate::prompts;
use crate::technique::transform::{decompose, retrieve_union};
use crate::technique::Technique;
use crate::toolkit::{Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryClass {
    Factual,
    Analytical,
    Opinion,
    Contextual,
}

impl QueryClass {
    fn as_str(&self) -> &'static str {
        match self {
            QueryClass::Factual => "factual",
            QueryClass::Analytical => "analytical",
            QueryClass::Opinion => "opinion",
            QueryClass::Contextual => "contextual",
        }
    }

    fn from_reply(reply: &str) -> Option<Self> {
        let lower = reply.to_lowercase();
        // Order matters: "contextual" also contains "contextual" only.
        if lower.contains("analytical") {
            Some(QueryClass::Analytical)
        } else if lower.contains("opinion") {
            Some(QueryClass::Opinion)
        } else if lower.contains("contextual") {
            Some(QueryClass::Contextual)
        } else if lower.contains("factual") {
            Some(QueryClass::Factual)
        } else {
            None
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            QueryClass::Factual => {
                "You are a precise factual assistant. Answer with accurate, specific information \
                 from the documents."
            }
            QueryClass::Analytical => {
                "You are an analytical assistant. Give a thorough analysis grounded in the \
                 documents, covering the relevant dimensions."
            }
            QueryClass::Opinion => {
                "You are a balanced summarizer. Present the different viewpoints found in the \
                 documents without taking sides."
            }
            QueryClass::Contextual => {
                "You are a contextual assistant. Tailor the answer to the situation implied by \
                 the question, grounded in the documents."
            }
        }
    }
}

pub struct Adaptive {
    tk: Toolkit,
}

impl Adaptive {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn classify(&self, query: &str) -> StageResult<(QueryClass, bool)> {
        let request =
            CompletionRequest::new(prompts::CLASSIFY_SYSTEM, prompts::classify_user(query))
                .max_tokens(16);
        match self.tk.complete("adaptive_classify", request).await {
            Ok(reply) => match QueryClass::from_reply(&reply) {
                Some(class) => Ok((class, false)),
                None => Ok((QueryClass::Factual, true)),
            },
            Err(e) if e.kind == ErrorKind::Canceled => Err(e),
            Err(_) => Ok((QueryClass::Factual, true)),
        }
    }

    /// Greedy diversity selection: keep a candidate only if its cosine
    /// distance to every already-kept chunk exceeds theta.
    async fn diversity_retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> StageResult<Vec<RetrievedChunk>> {
        let pool = (3 * top_k).max(top_k);
        let candidates = self.tk.retrieve("retrieve", query, pool).await?;
        if candidates.len() <= 1 || top_k == 0 {
            let mut kept = candidates;
            kept.truncate(top_k);
            return Ok(kept);
        }

        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.tk.embed_batch("retrieve", &texts).await?;

        let theta = self.tk.config.diversity_theta;
        let mut kept: Vec<RetrievedChunk> = Vec::new();
        let mut kept_vectors: Vec<&Vec<f32>> = Vec::new();
        for (candidate, vector) in candidates.into_iter().zip(embeddings.iter()) {
            let diverse = kept_vectors
                .iter()
                .all(|kv| (1.0 - cosine_similarity(kv, vector)) as f64 > theta);
            if diverse {
                kept.push(candidate);
                kept_vectors.push(vector);
                if kept.len() == top_k {
                    break;
                }
            }
        }

        self.tk.log(
            "diversity_filter",
            format!("kept {} of {} candidate(s)", kept.len(), pool),
            json!({ "theta": theta, "kept": kept.len() }),
        );
        Ok(kept)
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let (class, fallback) = self.classify(query).await?;
        self.tk.log(
            "adaptive_strategy_select",
            format!("routing as {}", class.as_str()),
            json!({ "category": class.as_str(), "fallback": fallback }),
        );

        self.tk.log(
            "retrieve_prepare",
            format!("{} retrieval strategy", class.as_str()),
            json!({ "k": top_k }),
        );
        let chunks: Vec<RetrievedChunk> = match class {
            QueryClass::Factual => {
                let request =
                    CompletionRequest::new(prompts::REWRITE_SYSTEM, prompts::rewrite_user(query))
                        .max_tokens(200);
                let rewritten = match self.tk.complete("adaptive_rewrite", request).await {
                    Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                    Ok(_) => query.to_string(),
                    Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
                    Err(_) => query.to_string(),
                };
                self.tk.retrieve("retrieve", &rewritten, top_k).await?
            }
            QueryClass::Analytical => {
                let sub_queries = decompose(&self.tk, query, 3).await?;
                retrieve_union(&self.tk, &sub_queries, top_k).await?
            }
            QueryClass::Opinion => self.diversity_retrieve(query, top_k).await?,
            QueryClass::Contextual => self.tk.retrieve("retrieve", query, top_k).await?,
        };
        let chunks: Vec<_> = chunks
            .into_iter()
            .map(|c| {
                if c.sub_scores.contains_key("vector_score") {
                    c
                } else {
                    let vector_score = c.score;
                    c.with_sub_score("vector_score", vector_score)
                }
            })
            .collect();
        self.tk.retrieve_complete(&chunks);

        // Class-specific generation framing unless the caller overrode it.
        let answer = if self.tk.config.system_prompt.is_some() {
            self.tk.generate(query, &chunks).await?
        } else {
            self.tk.log(
                "generate_prepare_context",
                "assembling generation context",
                json!({
                    "doc_count": chunks.len(),
                    "total_context_length": chunks.iter().map(|c| c.text.len()).sum::<usize>(),
                }),
            );
            let request = CompletionRequest::new(
                class.system_prompt(),
                prompts::answer_user(query, &chunks),
            )
            .temperature(0.2)
            .max_tokens(2000);
            self.tk.generate_with("generate", request).await?
        };

        Ok(Draft { answer, chunks })
    }
}

#[async_trait]
impl Technique for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(query, top_k, json!({ "diversity_theta": self.tk.config.diversity_theta }));
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_parses_loose_replies() {
        assert_eq!(QueryClass::from_reply("Analytical"), Some(QueryClass::Analytical));
        assert_eq!(
            QueryClass::from_reply("This is an opinion question."),
            Some(QueryClass::Opinion)
        );
        assert_eq!(QueryClass::from_reply("factual."), Some(QueryClass::Factual));
        assert_eq!(QueryClass::from_reply("no idea"), None);
    }
}
