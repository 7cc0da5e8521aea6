//! Shared data model for the raglab workspace.
//!
//! This crate defines the types that cross crate boundaries: document
//! chunks, retrieval results, technique outcomes, evaluation scores, the
//! per-query configuration surface, and the execution trace recorder.
//! It deliberately carries no I/O — clients, indexes and stores live in
//! their own crates.

pub mod config;
pub mod error;
pub mod parse;
pub mod trace;
pub mod types;

pub use config::{QueryConfig, TransformationType};
pub use error::ErrorKind;
pub use trace::{TraceEvent, TraceRecorder};
pub use types::{
    Chunk, EmbeddedChunk, EvaluationScore, QaRecord, RetrievedChunk, ScoreType, Session,
    TechniqueResult,
};
