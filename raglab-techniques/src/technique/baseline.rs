//! Baseline single-pass retrieval and generation.
//!
//! Embed the query once, similarity-search the index under the request's
//! document filter, and generate against the ordered contexts.

use async_trait::async_trait;
use serde_json::json;

use raglab_core::TechniqueResult;

use crate::technique::Technique;
use crate::toolkit::{Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

pub struct Baseline {
    tk: Toolkit,
}

impl Baseline {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        self.tk.log("retrieve_prepare", "similarity search", json!({ "k": top_k }));
        let chunks: Vec<_> = self
            .tk
            .retrieve("retrieve", query, top_k)
            .await?
            .into_iter()
            .map(|c| {
                let vector_score = c.score;
                c.with_sub_score("vector_score", vector_score)
            })
            .collect();
        self.tk.retrieve_complete(&chunks);

        let answer = self.tk.generate(query, &chunks).await?;
        Ok(Draft { answer, chunks })
    }
}

#[async_trait]
impl Technique for Baseline {
    fn name(&self) -> &'static str {
        "baseline"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(query, top_k, json!({}));
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
