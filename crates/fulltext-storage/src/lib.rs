//! Storage layer for the full-text pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for index state, source documents and indices
//! - Point lookup, batched upsert and batched delete of [`DocIndexState`]
//! - Class-scoped listing through a secondary index
//! - Source documents with an attached-document index
//!
//! The pipeline only talks to storage through the [`DocStateStore`] and
//! [`DocumentSource`] traits, so tests can substitute their own stores.
//!
//! [`DocIndexState`]: fulltext_types::DocIndexState

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod traits;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{AttachedKey, ClassIndexKey};
pub use traits::{DocStateStore, DocumentSource};
