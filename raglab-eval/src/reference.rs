//! Reference-style metrics on [0, 1].
//!
//! - faithfulness: fraction of the answer's atomic claims supported by the
//!   contexts, judged claim by claim.
//! - answer_relevancy: mean cosine similarity between the query embedding
//!   and embeddings of back-questions generated from the answer.
//! - context_precision / context_recall: need a reference answer and are
//!   skipped silently without one.
//!
//! Always invoked through the [`worker`](crate::worker) pool — see the
//! isolation note on the crate root.

use std::sync::Arc;

use raglab_core::parse::numbered_items;
use raglab_core::trace::preview;
use raglab_index::inmemory::cosine_similarity;
use raglab_index::EmbeddingProvider;
use raglab_model::{ChatModel, CompletionRequest};

use crate::error::{EvalError, Result};
use crate::prompts;

/// Upper bound on claims/contexts judged per metric, to cap model calls.
const MAX_JUDGED_ITEMS: usize = 10;

/// Default number of back-questions for answer relevancy.
const DEFAULT_BACK_QUESTIONS: usize = 3;

/// Outcome of one reference-metric evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceReport {
    /// Supported-claim fraction in [0, 1].
    pub faithfulness: f64,
    /// Mean query/back-question cosine similarity in [0, 1].
    pub answer_relevancy: f64,
    /// Present only when a reference answer was supplied.
    pub context_precision: Option<f64>,
    /// Present only when a reference answer was supplied.
    pub context_recall: Option<f64>,
    /// The answer yielded no extractable claims (faithfulness is 0, not 1).
    pub no_claims: bool,
}

/// Ragas-style metric evaluator.
pub struct ReferenceMetricsEvaluator {
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    back_questions: usize,
}

impl ReferenceMetricsEvaluator {
    /// Create an evaluator over the given model and embedder.
    pub fn new(model: Arc<dyn ChatModel>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { model, embedder, back_questions: DEFAULT_BACK_QUESTIONS }
    }

    /// Identifier for score rows.
    pub fn evaluator_name(&self) -> String {
        format!("reference_metrics:{}", self.model.name())
    }

    /// Evaluate one record.
    pub async fn evaluate(
        &self,
        query: &str,
        answer: &str,
        contexts: &[String],
        reference: Option<&str>,
    ) -> Result<ReferenceReport> {
        let context = preview(&contexts.join("\n\n"), 2000);

        let claims = self.extract_claims(answer).await?;
        let no_claims = claims.is_empty();
        let faithfulness = if no_claims {
            0.0
        } else {
            self.supported_fraction(&claims, &context).await?
        };

        let answer_relevancy = self.answer_relevancy(query, answer).await?;

        let (context_precision, context_recall) = match reference {
            Some(reference) if !contexts.is_empty() => (
                Some(self.context_precision(contexts, reference).await?),
                Some(self.context_recall(reference, &context).await?),
            ),
            _ => (None, None),
        };

        Ok(ReferenceReport {
            faithfulness,
            answer_relevancy,
            context_precision,
            context_recall,
            no_claims,
        })
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.model.complete(&request).await.map_err(|e| EvalError::Model(e.to_string()))
    }

    async fn extract_claims(&self, text: &str) -> Result<Vec<String>> {
        let request =
            CompletionRequest::new(prompts::CLAIMS_SYSTEM, prompts::claims_user(text))
                .max_tokens(500);
        let reply = self.complete(request).await?;
        if reply.trim().eq_ignore_ascii_case("none") {
            return Ok(Vec::new());
        }
        let mut claims = numbered_items(&reply);
        claims.truncate(MAX_JUDGED_ITEMS);
        Ok(claims)
    }

    async fn supported_fraction(&self, claims: &[String], context: &str) -> Result<f64> {
        let mut supported = 0usize;
        for claim in claims {
            let request = CompletionRequest::new(
                prompts::CLAIM_SUPPORT_SYSTEM,
                prompts::claim_support_user(claim, context),
            )
            .max_tokens(8);
            let reply = self.complete(request).await?;
            if reply.to_lowercase().contains("yes") {
                supported += 1;
            }
        }
        Ok(supported as f64 / claims.len() as f64)
    }

    async fn answer_relevancy(&self, query: &str, answer: &str) -> Result<f64> {
        let request = CompletionRequest::new(
            prompts::BACK_QUESTIONS_SYSTEM,
            prompts::back_questions_user(answer, self.back_questions),
        )
        .temperature(0.3)
        .max_tokens(300);
        let reply = self.complete(request).await?;
        let mut questions = numbered_items(&reply);
        questions.truncate(self.back_questions);
        if questions.is_empty() {
            return Ok(0.0);
        }

        let mut texts = vec![query.to_string()];
        texts.extend(questions);
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| EvalError::Embedding(e.to_string()))?;
        let (query_vector, question_vectors) = vectors.split_first().ok_or_else(|| {
            EvalError::Embedding("embedding backend returned no vectors".into())
        })?;

        let mean: f64 = question_vectors
            .iter()
            .map(|v| f64::from(cosine_similarity(query_vector, v)))
            .sum::<f64>()
            / question_vectors.len() as f64;
        Ok(mean.clamp(0.0, 1.0))
    }

    async fn context_precision(&self, contexts: &[String], reference: &str) -> Result<f64> {
        let judged = contexts.iter().take(MAX_JUDGED_ITEMS);
        let mut useful = 0usize;
        let mut total = 0usize;
        for context in judged {
            let request = CompletionRequest::new(
                prompts::CONTEXT_USEFUL_SYSTEM,
                prompts::context_useful_user(&preview(context, 1500), reference),
            )
            .max_tokens(8);
            let reply = self.complete(request).await?;
            if reply.to_lowercase().contains("yes") {
                useful += 1;
            }
            total += 1;
        }
        Ok(useful as f64 / total.max(1) as f64)
    }

    async fn context_recall(&self, reference: &str, context: &str) -> Result<f64> {
        let claims = self.extract_claims(reference).await?;
        if claims.is_empty() {
            return Ok(0.0);
        }
        self.supported_fraction(&claims, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raglab_index::IndexError;
    use raglab_model::ModelError;

    /// Scripted model covering claim extraction, claim support and
    /// back-question generation.
    struct ScriptModel;

    #[async_trait]
    impl ChatModel for ScriptModel {
        fn name(&self) -> &str {
            "script"
        }
        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ModelError> {
            if request.system.contains("atomic factual claims") {
                Ok("1. Paris is the capital of France.\n2. Paris lies on the Seine.".into())
            } else if request.system.contains("verify whether a claim") {
                // Support only the capital claim.
                if request.user.contains("capital") {
                    Ok("yes".into())
                } else {
                    Ok("no".into())
                }
            } else if request.system.contains("reverse-engineer") {
                Ok("1. What is the capital of France?\n2. Which river crosses Paris?\n3. Where is Paris?".into())
            } else {
                Ok("yes".into())
            }
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, IndexError> {
            // Every text maps to the same unit vector: cosine 1.0 pairwise.
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn faithfulness_is_the_supported_claim_fraction() {
        let evaluator = ReferenceMetricsEvaluator::new(Arc::new(ScriptModel), Arc::new(UnitEmbedder));
        let report = evaluator
            .evaluate(
                "What is the capital of France?",
                "Paris is the capital of France and lies on the Seine.",
                &["Paris is the capital of France.".to_string()],
                None,
            )
            .await
            .unwrap();
        assert!((report.faithfulness - 0.5).abs() < 1e-9);
        assert!(!report.no_claims);
        assert!((report.answer_relevancy - 1.0).abs() < 1e-6);
        assert_eq!(report.context_precision, None);
        assert_eq!(report.context_recall, None);
    }

    struct NoClaimsModel;

    #[async_trait]
    impl ChatModel for NoClaimsModel {
        fn name(&self) -> &str {
            "noclaims"
        }
        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ModelError> {
            if request.system.contains("atomic factual claims") {
                Ok("none".into())
            } else if request.system.contains("reverse-engineer") {
                Ok("1. Who are you?".into())
            } else {
                Ok("no".into())
            }
        }
    }

    #[tokio::test]
    async fn no_claims_scores_zero_not_one() {
        let evaluator =
            ReferenceMetricsEvaluator::new(Arc::new(NoClaimsModel), Arc::new(UnitEmbedder));
        let report = evaluator.evaluate("q", "Hello!", &["ctx".to_string()], None).await.unwrap();
        assert_eq!(report.faithfulness, 0.0);
        assert!(report.no_claims);
    }

    #[tokio::test]
    async fn reference_enables_the_optional_metrics() {
        let evaluator = ReferenceMetricsEvaluator::new(Arc::new(ScriptModel), Arc::new(UnitEmbedder));
        let report = evaluator
            .evaluate(
                "q",
                "Paris is the capital of France.",
                &["Paris is the capital of France.".to_string()],
                Some("Paris is the capital of France."),
            )
            .await
            .unwrap();
        assert!(report.context_precision.is_some());
        assert!(report.context_recall.is_some());
    }
}
