//! Query transformation: rewrite, step-back, or decompose before retrieval.
//!
//! All three sub-modes retrieve with transformed queries but generate with
//! the original one. Decompose retrieves each sub-query independently and
//! assembles the deduplicated union, keeping the maximum score per chunk.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use raglab_core::parse::numbered_items;
use raglab_core::trace::preview;
use raglab_core::{ErrorKind, RetrievedChunk, TechniqueResult, TransformationType};
use raglab_model::CompletionRequest;

use crate::prompts;
use crate::technique::Technique;
use crate::toolkit::{Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

pub struct QueryTransformation {
    tk: Toolkit,
}

/// Run one transformation call; falls back to the original query when the
/// model fails (cancellation still propagates).
async fn transform_query(
    tk: &Toolkit,
    stage: &'static str,
    request: CompletionRequest,
    original: &str,
) -> StageResult<String> {
    match tk.complete(stage, request).await {
        Ok(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                Ok(original.to_string())
            } else {
                Ok(text)
            }
        }
        Err(e) if e.kind == ErrorKind::Canceled => Err(e),
        Err(e) => {
            tk.log(
                &format!("{stage}_fallback"),
                format!("transformation failed, using original query: {}", e.message),
                json!({}),
            );
            Ok(original.to_string())
        }
    }
}

/// Decompose `query` into up to `n` sub-queries via the model; a parse
/// failure falls back to the original query as the single sub-query.
pub(crate) async fn decompose(tk: &Toolkit, query: &str, n: usize) -> StageResult<Vec<String>> {
    let request =
        CompletionRequest::new(prompts::DECOMPOSE_SYSTEM, prompts::decompose_user(query, n))
            .temperature(0.2)
            .max_tokens(500);
    let sub_queries = match tk.complete("transform_decompose", request).await {
        Ok(reply) => {
            let mut items = numbered_items(&reply);
            items.truncate(n);
            if items.is_empty() {
                vec![query.to_string()]
            } else {
                items
            }
        }
        Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
        Err(e) => {
            tk.log(
                "transform_decompose_fallback",
                format!("decomposition failed, using original query: {}", e.message),
                json!({}),
            );
            vec![query.to_string()]
        }
    };
    Ok(sub_queries)
}

/// Retrieve every sub-query independently and merge: dedup by chunk id,
/// keep the max score, order by score descending, truncate to `top_k`.
pub(crate) async fn retrieve_union(
    tk: &Toolkit,
    sub_queries: &[String],
    top_k: usize,
) -> StageResult<Vec<RetrievedChunk>> {
    let mut merged: HashMap<String, RetrievedChunk> = HashMap::new();
    for sub_query in sub_queries {
        let hits = tk.retrieve("retrieve", sub_query, top_k * 2).await?;
        for hit in hits {
            match merged.get_mut(&hit.chunk_id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    merged.insert(hit.chunk_id.clone(), hit);
                }
            }
        }
    }

    let mut union: Vec<RetrievedChunk> = merged
        .into_values()
        .map(|c| {
            let vector_score = c.score;
            c.with_sub_score("vector_score", vector_score)
        })
        .collect();
    union.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    union.truncate(top_k);
    Ok(union)
}

impl QueryTransformation {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let mode = self.tk.config.transformation_type;
        let queries: Vec<String> = match mode {
            TransformationType::Rewrite => {
                let request =
                    CompletionRequest::new(prompts::REWRITE_SYSTEM, prompts::rewrite_user(query))
                        .max_tokens(200);
                vec![transform_query(&self.tk, "transform_rewrite", request, query).await?]
            }
            TransformationType::Stepback => {
                let request =
                    CompletionRequest::new(prompts::STEPBACK_SYSTEM, prompts::stepback_user(query))
                        .temperature(0.1)
                        .max_tokens(200);
                vec![transform_query(&self.tk, "transform_stepback", request, query).await?]
            }
            TransformationType::Decompose => {
                decompose(&self.tk, query, self.tk.config.num_subqueries).await?
            }
        };

        self.tk.log(
            "transform_expand",
            format!("{} transformed {} quer(ies)", mode.as_str(), queries.len()),
            json!({
                "mode": mode.as_str(),
                "queries": queries.iter().map(|q| preview(q, 200)).collect::<Vec<_>>(),
            }),
        );

        self.tk.log(
            "retrieve_prepare",
            "retrieval over transformed queries",
            json!({ "k": top_k, "query_count": queries.len() }),
        );
        let chunks = if queries.len() == 1 {
            self.tk
                .retrieve("retrieve", &queries[0], top_k)
                .await?
                .into_iter()
                .map(|c| {
                    let vector_score = c.score;
                    c.with_sub_score("vector_score", vector_score)
                })
                .collect()
        } else {
            retrieve_union(&self.tk, &queries, top_k).await?
        };
        self.tk.retrieve_complete(&chunks);

        // The user question stays the original query.
        let answer = self.tk.generate(query, &chunks).await?;
        Ok(Draft { answer, chunks })
    }
}

#[async_trait]
impl Technique for QueryTransformation {
    fn name(&self) -> &'static str {
        "query_transformation"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(
            query,
            top_k,
            json!({
                "transformation_type": self.tk.config.transformation_type.as_str(),
                "num_subqueries": self.tk.config.num_subqueries,
            }),
        );
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
