//! Storage capabilities consumed by the pipeline.

use fulltext_types::{ClassId, DocIndexState, SourceDoc};

use crate::error::StorageError;

/// Persistence of per-document index state.
///
/// Implementations must be safe to share across worker tasks; the pipeline
/// serializes writes per document itself.
pub trait DocStateStore: Send + Sync {
    /// Point lookup by document id.
    fn get_state(&self, doc_id: &str) -> Result<Option<DocIndexState>, StorageError>;

    /// Batched upsert. All states are written atomically.
    fn put_states(&self, states: &[DocIndexState]) -> Result<(), StorageError>;

    /// Batched delete. Returns the number of records that existed.
    fn delete_states(&self, doc_ids: &[String]) -> Result<usize, StorageError>;

    /// Every state whose object class is one of `classes`.
    fn states_for_classes(&self, classes: &[ClassId]) -> Result<Vec<DocIndexState>, StorageError>;

    /// Up to `limit` states in id order, strictly after `after`.
    fn scan_states(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocIndexState>, StorageError>;
}

/// Read access to source documents.
pub trait DocumentSource: Send + Sync {
    /// Fetch a document by id.
    fn get_document(&self, doc_id: &str) -> Result<Option<SourceDoc>, StorageError>;

    /// Documents attached to `parent`.
    fn attached_documents(&self, parent: &str) -> Result<Vec<SourceDoc>, StorageError>;
}
