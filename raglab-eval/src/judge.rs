//! The dimensional LLM judge.
//!
//! One completion per dimension in {relevance, faithfulness, coherence,
//! fluency, conciseness}; a tolerant parser extracts the first 0–10 number
//! from the reply. A dimension whose call fails or whose reply does not
//! parse scores 0 and is recorded — other dimensions are unaffected.
//! With an empty context, faithfulness is skipped entirely and excluded
//! from the mean (never emitted as a misleading zero).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use raglab_core::parse::first_number_in;
use raglab_core::trace::preview;
use raglab_model::{ChatModel, CompletionRequest};

use crate::prompts;

/// The five fixed quality dimensions, in reporting order.
pub const DIMENSIONS: [&str; 5] =
    ["relevance", "faithfulness", "coherence", "fluency", "conciseness"];

/// Outcome of one dimensional evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionalReport {
    /// Dimension name → 0–10 value. Skipped dimensions are absent.
    pub dimensions: BTreeMap<String, f64>,
    /// Unweighted mean of the present dimensions.
    pub overall: Option<f64>,
    /// Concatenated human-readable feedback.
    pub feedback: String,
    /// Dimensions whose judge call failed or did not parse (scored 0).
    pub failures: Vec<String>,
    /// Optional 0–10 correctness against a reference answer; carried in
    /// score metadata, not in the fixed dimensions.
    pub correctness: Option<f64>,
}

/// LLM-backed scorer for (answer, contexts, query) tuples.
pub struct LlmJudge {
    model: Arc<dyn ChatModel>,
}

impl LlmJudge {
    /// Create a judge over the given model.
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Identifier of the judging model.
    pub fn evaluator_name(&self) -> String {
        format!("llm_judge:{}", self.model.name())
    }

    /// Score one answer on all applicable dimensions.
    pub async fn evaluate(
        &self,
        query: &str,
        answer: &str,
        contexts: &[String],
        reference: Option<&str>,
    ) -> DimensionalReport {
        let mut dimensions = BTreeMap::new();
        let mut failures = Vec::new();

        let context = joined_context(contexts, 2000);

        for name in DIMENSIONS {
            if name == "faithfulness" && contexts.is_empty() {
                // A pure-LLM answer has no context to be faithful to.
                continue;
            }
            let (system, user) = match name {
                "relevance" => (
                    prompts::dimension_system("relevance", prompts::RELEVANCE_SCALE),
                    prompts::relevance_user(query, answer),
                ),
                "faithfulness" => (
                    prompts::dimension_system("faithfulness", prompts::FAITHFULNESS_SCALE),
                    prompts::faithfulness_user(answer, &context),
                ),
                "coherence" => (
                    prompts::dimension_system("coherence", prompts::COHERENCE_SCALE),
                    prompts::standalone_user("Coherence", answer),
                ),
                "fluency" => (
                    prompts::dimension_system("fluency", prompts::FLUENCY_SCALE),
                    prompts::standalone_user("Fluency", answer),
                ),
                _ => (
                    prompts::dimension_system("conciseness", prompts::CONCISENESS_SCALE),
                    prompts::standalone_user("Conciseness", answer),
                ),
            };

            let value = self.score_call(name, &system, &user, &mut failures).await;
            dimensions.insert(name.to_string(), value);
        }

        let correctness = match reference {
            Some(reference) => {
                let system = prompts::dimension_system("correctness", prompts::CORRECTNESS_SCALE);
                let user = prompts::correctness_user(answer, reference);
                Some(self.score_call("correctness", &system, &user, &mut failures).await)
            }
            None => None,
        };

        let overall = if dimensions.is_empty() {
            None
        } else {
            let sum: f64 = dimensions.values().sum();
            Some((sum / dimensions.len() as f64 * 100.0).round() / 100.0)
        };

        let feedback = build_feedback(&dimensions, overall);
        DimensionalReport { dimensions, overall, feedback, failures, correctness }
    }

    async fn score_call(
        &self,
        dimension: &str,
        system: &str,
        user: &str,
        failures: &mut Vec<String>,
    ) -> f64 {
        let request = CompletionRequest::new(system, user).max_tokens(100);
        match self.model.complete(&request).await {
            Ok(reply) => match first_number_in(&reply, 0.0, 10.0) {
                Some(value) => value,
                None => {
                    warn!(dimension, reply = %preview(&reply, 80), "judge reply did not parse");
                    failures.push(dimension.to_string());
                    0.0
                }
            },
            Err(e) => {
                warn!(dimension, error = %e, "judge call failed");
                failures.push(dimension.to_string());
                0.0
            }
        }
    }
}

/// Join up to the first three contexts and truncate for the prompt.
fn joined_context(contexts: &[String], max_chars: usize) -> String {
    let joined = contexts.iter().take(3).cloned().collect::<Vec<_>>().join("\n\n");
    preview(&joined, max_chars)
}

/// Summarize strengths and weaknesses the way an operator scans them.
fn build_feedback(dimensions: &BTreeMap<String, f64>, overall: Option<f64>) -> String {
    let mut parts = Vec::new();
    match overall {
        Some(o) if o >= 8.0 => parts.push("overall: excellent".to_string()),
        Some(o) if o >= 6.0 => parts.push("overall: good".to_string()),
        Some(o) if o >= 4.0 => parts.push("overall: fair".to_string()),
        Some(_) => parts.push("overall: poor".to_string()),
        None => parts.push("overall: not scored".to_string()),
    }

    let strengths: Vec<String> = dimensions
        .iter()
        .filter(|(_, v)| **v >= 8.0)
        .map(|(k, v)| format!("{k} {v:.1}"))
        .collect();
    let weaknesses: Vec<String> = dimensions
        .iter()
        .filter(|(_, v)| **v < 5.0)
        .map(|(k, v)| format!("{k} {v:.1}"))
        .collect();

    if !strengths.is_empty() {
        parts.push(format!("strong: {}", strengths.join(", ")));
    }
    if !weaknesses.is_empty() {
        parts.push(format!("weak: {}", weaknesses.join(", ")));
    }
    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raglab_model::ModelError;

    struct FixedScoreModel(&'static str);

    #[async_trait]
    impl ChatModel for FixedScoreModel {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ModelError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ModelError> {
            Err(ModelError::Permanent("down".into()))
        }
    }

    #[tokio::test]
    async fn all_five_dimensions_present_with_contexts() {
        let judge = LlmJudge::new(Arc::new(FixedScoreModel("8 - solid answer")));
        let report =
            judge.evaluate("q", "a", &["some context".to_string()], None).await;
        assert_eq!(report.dimensions.len(), 5);
        assert_eq!(report.overall, Some(8.0));
        assert!(report.failures.is_empty());
        assert!(report.feedback.contains("overall"));
    }

    #[tokio::test]
    async fn faithfulness_skipped_without_contexts() {
        let judge = LlmJudge::new(Arc::new(FixedScoreModel("7")));
        let report = judge.evaluate("q", "a", &[], None).await;
        assert!(!report.dimensions.contains_key("faithfulness"));
        assert_eq!(report.dimensions.len(), 4);
        assert_eq!(report.overall, Some(7.0));
    }

    #[tokio::test]
    async fn judge_failures_score_zero_and_are_recorded() {
        let judge = LlmJudge::new(Arc::new(FailingModel));
        let report = judge.evaluate("q", "a", &["ctx".to_string()], None).await;
        assert_eq!(report.dimensions.len(), 5);
        assert!(report.dimensions.values().all(|v| *v == 0.0));
        assert_eq!(report.failures.len(), 5);
        assert_eq!(report.overall, Some(0.0));
    }

    #[tokio::test]
    async fn unparseable_reply_scores_zero() {
        let judge = LlmJudge::new(Arc::new(FixedScoreModel("no comment")));
        let report = judge.evaluate("q", "a", &[], None).await;
        assert!(report.dimensions.values().all(|v| *v == 0.0));
        assert_eq!(report.failures.len(), 4);
    }

    #[tokio::test]
    async fn reference_adds_correctness_outside_the_dimensions() {
        let judge = LlmJudge::new(Arc::new(FixedScoreModel("9")));
        let report = judge.evaluate("q", "a", &[], Some("ref")).await;
        assert_eq!(report.correctness, Some(9.0));
        assert!(!report.dimensions.contains_key("correctness"));
    }
}
