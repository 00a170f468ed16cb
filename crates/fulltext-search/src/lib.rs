//! # fulltext-search
//!
//! Full-text backend for the indexing pipeline using Tantivy.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence
//! - Multi-valued class field (own class plus ancestors) for class-scoped queries
//! - Space filter, size/offset paging, BM25 scoring
//! - Async [`SearchBackend`] capability consumed by the pipeline

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;

pub use backend::{SearchBackend, TantivyBackend};
pub use document::{indexed_doc_to_doc, tantivy_doc_to_indexed};
pub use error::SearchError;
pub use index::{open_or_create_index, SearchIndex, SearchIndexConfig};
pub use indexer::SearchIndexer;
pub use schema::{build_fulltext_schema, SearchSchema};
pub use searcher::FullTextSearcher;
