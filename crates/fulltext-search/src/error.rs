//! Errors surfaced by the full-text backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Tantivy: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Bad query: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("Index I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Stored `fields` payload is not valid JSON
    #[error("Corrupt stored fields: {0}")]
    Serialization(#[from] serde_json::Error),

    /// On-disk index lacks a field the document layout needs
    #[error("Index schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Writer mutex poisoned by a panicking holder
    #[error("Index writer poisoned: {0}")]
    IndexLocked(String),

    /// Blocking index task panicked or was cancelled
    #[error("Index task failed: {0}")]
    Task(String),

    /// Backend cannot be reached; the pipeline retries on a later pass
    #[error("Search backend unavailable: {0}")]
    Unavailable(String),
}
