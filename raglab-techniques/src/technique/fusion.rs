//! Hybrid vector + lexical retrieval with weighted score fusion.
//!
//! One vector search for `wider_k = max(top_k, 10)` candidates; a BM25
//! index built over that same candidate set scores the query lexically.
//! Both score distributions are min-max normalized to [0, 1] and combined
//! as `w_vec·nv + w_lex·nl`; a chunk absent from one ranking contributes 0
//! for that component.

use async_trait::async_trait;
use serde_json::json;

use raglab_core::TechniqueResult;
use raglab_index::LexicalIndex;

use crate::technique::Technique;
use crate::toolkit::{min_max_normalize, Draft, RunContext, StageResult, TechniqueDeps, Toolkit};

pub struct Fusion {
    tk: Toolkit,
}

impl Fusion {
    pub(crate) fn new(deps: &TechniqueDeps, ctx: RunContext) -> Self {
        Self { tk: Toolkit::new(deps, ctx) }
    }

    async fn run(&self, query: &str, top_k: usize) -> StageResult<Draft> {
        let wider_k = top_k.max(10);
        self.tk.log(
            "retrieve_prepare",
            "hybrid retrieval",
            json!({ "k": wider_k, "final_k": top_k }),
        );
        let candidates = self.tk.retrieve("retrieve", query, wider_k).await?;

        if candidates.is_empty() {
            self.tk.retrieve_complete(&candidates);
            let answer = self.tk.generate(query, &candidates).await?;
            return Ok(Draft { answer, chunks: candidates });
        }

        // Lexical index over the candidate set, request-scoped.
        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let lexical = LexicalIndex::build(&texts);
        let lexical_scores: Vec<f64> = lexical.scores(query).into_iter().map(f64::from).collect();
        let vector_scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();

        let norm_vector = min_max_normalize(&vector_scores);
        let norm_lexical = min_max_normalize(&lexical_scores);

        let w_vec = self.tk.config.vector_weight;
        let w_lex = self.tk.config.lexical_weight;

        let lexical_matches = lexical_scores.iter().filter(|s| **s > 0.0).count();
        self.tk.log(
            "fusion_merge",
            format!(
                "fused {} vector candidate(s), {} with lexical overlap",
                candidates.len(),
                lexical_matches
            ),
            json!({
                "candidates": candidates.len(),
                "lexical_matches": lexical_matches,
                "vector_weight": w_vec,
                "lexical_weight": w_lex,
            }),
        );

        let mut fused: Vec<_> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let score = w_vec * norm_vector[i] + w_lex * norm_lexical[i];
                let mut chunk = c
                    .with_sub_score("vector_score", vector_scores[i])
                    .with_sub_score("lexical_score", lexical_scores[i]);
                chunk.score = score;
                chunk
            })
            .collect();

        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        fused.truncate(top_k);
        self.tk.retrieve_complete(&fused);

        let answer = self.tk.generate(query, &fused).await?;
        Ok(Draft { answer, chunks: fused })
    }
}

#[async_trait]
impl Technique for Fusion {
    fn name(&self) -> &'static str {
        "fusion"
    }

    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult {
        self.tk.init(
            query,
            top_k,
            json!({
                "vector_weight": self.tk.config.vector_weight,
                "lexical_weight": self.tk.config.lexical_weight,
            }),
        );
        let outcome = self.run(query, top_k).await;
        self.tk.finish(self.name(), outcome)
    }
}
