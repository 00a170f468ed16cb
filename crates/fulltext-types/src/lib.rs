//! # fulltext-types
//!
//! Shared domain types for the full-text indexing pipeline.
//!
//! This crate defines the core data structures used throughout the system:
//! - [`DocIndexState`]: Persisted per-document indexing progress
//! - [`DocUpdate`]: Partial update applied to a state by a stage
//! - [`QueuedChange`]: Coalesced change notification for one document
//! - [`SourceDoc`]: Raw document as supplied by the document collaborator
//! - [`IndexedDoc`] / [`SearchQuery`] / [`SearchHits`]: Search backend shapes
//! - [`ClassHierarchy`] / [`FullTextSearchContext`]: Model collaborator view
//! - [`StageId`]: Version-qualified stage identifiers
//! - [`Settings`]: Layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use fulltext_types::{DocIndexState, StageId};
//!
//! let id = StageId::parse("cnt-v3").unwrap();
//! assert_eq!(id.name(), "cnt");
//!
//! let state = DocIndexState::new("doc-1", "tracker:class:Issue");
//! assert!(!state.is_stage_complete("cnt-v3"));
//! ```

pub mod change;
pub mod config;
pub mod document;
pub mod error;
pub mod hierarchy;
pub mod search;
pub mod stage_id;
pub mod state;

pub use change::{ChangeKind, QueuedChange};
pub use config::{ClassSettings, PipelineSettings, Settings, StageSettings};
pub use document::{ContentBlob, SourceDoc};
pub use error::FulltextError;
pub use hierarchy::{ClassHierarchy, FullTextSearchContext};
pub use search::{IndexedDoc, SearchHits, SearchQuery};
pub use stage_id::{
    StageId, COLLAB_STAGE_ID, CONTENT_STAGE_ID, FIELD_STAGE_ID, FULL_TEXT_PUSH_STAGE_ID,
    FULL_TEXT_PUSH_STAGE_PREFIX, SUMMARY_STAGE_ID,
};
pub use state::{is_positive_marker, value_text, DocIndexState, DocUpdate};

/// Identifier of a source document.
pub type DocId = String;

/// Identifier of a document class.
pub type ClassId = String;
