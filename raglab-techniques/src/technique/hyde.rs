//! Hypothetical-document-embedding retrieval.
//!
//! The model writes a plausible answer paragraph for the query; that
//! paragraph is embedded in place of the query for retrieval. The final
//! answer is generated against the original query. If the hypothesis call
//! fails, retrieval falls back to embedding the original query.

use async_trait::async_trait;
use serde_json::json;

use raglab_core::trace::preview;
use raglab_core::{ErrorKind, TechniqueResult};
use raglab_model::CompletionRequest;

use crate::prompts;
use crate::technique::Technique;
use crate::toolkit::{Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

pub struct Hyde {
    tk: Toolkit,
}

impl Hyde {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let request = CompletionRequest::new(prompts::HYDE_SYSTEM, prompts::hyde_user(query))
            .temperature(self.tk.config.hyde_temperature)
            .max_tokens(500);

        let hypothesis = match self.tk.complete("hyde_hypothesis", request).await {
            Ok(text) => {
                self.tk.log(
                    "hyde_hypothesis",
                    "hypothetical document generated",
                    json!({
                        "length": text.chars().count(),
                        "preview": preview(&text, 200),
                    }),
                );
                text
            }
            Err(e) if e.kind == ErrorKind::Canceled => return Err(e),
            Err(e) => {
                self.tk.log(
                    "hyde_hypothesis_fallback",
                    format!("hypothesis generation failed: {}", e.message),
                    json!({ "fallback": "original_query" }),
                );
                query.to_string()
            }
        };

        self.tk.log(
            "retrieve_prepare",
            "similarity search via hypothetical document",
            json!({ "k": top_k }),
        );
        let chunks: Vec<_> = self
            .tk
            .retrieve("retrieve", &hypothesis, top_k)
            .await?
            .into_iter()
            .map(|c| {
                let vector_score = c.score;
                c.with_sub_score("vector_score", vector_score)
            })
            .collect();
        self.tk.retrieve_complete(&chunks);

        // Generation always sees the original query, not the hypothesis.
        let answer = self.tk.generate(query, &chunks).await?;
        Ok(Draft { answer, chunks })
    }
}

#[async_trait]
impl Technique for Hyde {
    fn name(&self) -> &'static str {
        "hyde"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(query, top_k, json!({ "hyde_temperature": self.tk.config.hyde_temperature }));
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
