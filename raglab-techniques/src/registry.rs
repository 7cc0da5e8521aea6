//! The named catalog of techniques.

use thiserror::Error;

use crate::technique::adaptive::Adaptive;
use crate::technique::baseline::Baseline;
use crate::technique::fusion::Fusion;
use crate::technique::hyde::Hyde;
use crate::technique::reranker::Reranker;
use crate::technique::self_reflective::SelfReflective;
use crate::technique::transform::QueryTransformation;
use crate::technique::Technique;
use crate::toolkit::{RunContext, TechniqueDeps};

/// Registry names in sorted order.
const NAMES: [&str; 7] = [
    "adaptive",
    "baseline",
    "fusion",
    "hyde",
    "query_transformation",
    "reranker",
    "self_reflective",
];

/// Error from [`TechniqueRegistry::construct`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested name is not in the catalog.
    #[error("unknown technique: {0}")]
    UnknownTechnique(String),
}

/// Catalog of available techniques.
///
/// Construction is cheap — no I/O happens until `answer` is called — and
/// every instance is request-scoped: it owns its recorder and cancellation
/// token and shares only the read-only index and the concurrency-safe
/// clients.
pub struct TechniqueRegistry;

impl TechniqueRegistry {
    /// The available technique names, sorted.
    pub fn names() -> &'static [&'static str] {
        &NAMES
    }

    /// Whether `name` is in the catalog.
    pub fn contains(name: &str) -> bool {
        NAMES.contains(&name)
    }

    /// Build a technique instance for one run.
    pub fn construct(
        name: &str,
        deps: &TechniqueDeps,
        ctx: RunContext,
    ) -> Result<Box<dyn Technique>, RegistryError> {
        let technique: Box<dyn Technique> = match name {
            "adaptive" => Box::new(Adaptive::new(deps, ctx)),
            "baseline" => Box::new(Baseline::new(deps, ctx)),
            "fusion" => Box::new(Fusion::new(deps, ctx)),
            "hyde" => Box::new(Hyde::new(deps, ctx)),
            "query_transformation" => Box::new(QueryTransformation::new(deps, ctx)),
            "reranker" => Box::new(Reranker::new(deps, ctx)),
            "self_reflective" => Box::new(SelfReflective::new(deps, ctx)),
            other => return Err(RegistryError::UnknownTechnique(other.to_string())),
        };
        Ok(technique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sorted_and_complete() {
        let mut sorted = NAMES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, NAMES.to_vec());
        assert_eq!(NAMES.len(), 7);
    }

    #[test]
    fn contains_matches_the_catalog() {
        assert!(TechniqueRegistry::contains("baseline"));
        assert!(TechniqueRegistry::contains("self_reflective"));
        assert!(!TechniqueRegistry::contains("simple_rag"));
    }
}
