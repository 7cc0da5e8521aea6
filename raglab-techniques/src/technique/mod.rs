//! The technique contract and the seven built-in strategies.

use async_trait::async_trait;

use raglab_core::TechniqueResult;

pub mod adaptive;
pub mod baseline;
pub mod fusion;
pub mod hyde;
pub mod reranker;
pub mod self_reflective;
pub mod transform;

/// A retrieval-augmented generation strategy.
///
/// `answer` never fails: every exception path inside a technique is caught,
/// classified and returned as a [`TechniqueResult`] with `error_kind` set.
/// The dispatcher treats the absence of a result as an infrastructure fault.
#[async_trait]
pub trait Technique: Send {
    /// Registry name of the technique.
    fn name(&self) -> &'static str;

    /// Run the technique against one query.
    async fn answer(&self, query: &str, top_k: usize) -> TechniqueResult;
}
