//! SQLite persistence layer.
//!
//! Four tables: `sessions`, `qa_records`, `evaluations` and the embedded
//! vector store `vector_chunks` used to warm the in-memory index across
//! process runs. Retrieved chunks, traces and score metadata are stored as
//! JSON columns; a fan-out's records are written in one transaction.

pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{SqliteStore, TechniqueStats};
