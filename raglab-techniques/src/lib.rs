//! RAG technique implementations, registry and fan-out dispatcher.
//!
//! A [`Technique`] answers one query using the shared capability set
//! {embed, search, complete, log}; the [`TechniqueRegistry`] constructs
//! request-scoped instances by name; the [`FanoutDispatcher`] runs the
//! selected techniques in parallel under a concurrency bound, isolates
//! failures, and persists the batch through a [`QaRecordSink`].

pub mod dispatcher;
pub mod prompts;
pub mod registry;
pub mod technique;
pub mod toolkit;

pub use dispatcher::{
    FanoutDispatcher, FanoutError, FanoutOutcome, FanoutRequest, QaRecordSink, SinkError,
};
pub use registry::{RegistryError, TechniqueRegistry};
pub use technique::Technique;
pub use toolkit::{RunContext, TechniqueDeps};
