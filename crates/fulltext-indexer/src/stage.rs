//! Stage contract.
//!
//! A stage is a unit of indexing work with declared prerequisites. The
//! pipeline hands it batches of documents whose `require` set is complete;
//! the stage reports progress per document through
//! [`FullTextPipeline::update`](crate::FullTextPipeline::update).

use std::sync::Arc;

use async_trait::async_trait;

use fulltext_types::{ClassId, DocId, DocIndexState, DocUpdate, SearchHits, SearchQuery, StageId};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;

/// Handler invoked whenever an update changes a document's fields.
///
/// Receives the state before the update and the update itself; it may add
/// stage clears to the update. Handlers run for both mark values.
pub type UpdateFieldsHandler = Arc<dyn Fn(&DocIndexState, &mut DocUpdate) + Send + Sync>;

/// Static description of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Version-qualified identifier, used as the marker key
    pub stage_id: StageId,

    /// Stages that must be complete first
    pub require: Vec<StageId>,

    /// When set, completing this stage clears every other marker except these
    pub clear_except: Option<Vec<StageId>>,

    /// Disabled stages are dropped from the chain
    pub enabled: bool,
}

impl StageDescriptor {
    /// Enabled descriptor with no prerequisites.
    pub fn new(stage_id: StageId) -> Self {
        Self {
            stage_id,
            require: Vec::new(),
            clear_except: None,
            enabled: true,
        }
    }

    /// Parse `stage_id` and build a descriptor.
    pub fn parse(stage_id: &str) -> Result<Self, IndexingError> {
        Ok(Self::new(StageId::parse(stage_id)?))
    }

    /// Add prerequisites.
    pub fn requires(mut self, ids: &[&str]) -> Result<Self, IndexingError> {
        for id in ids {
            self.require.push(StageId::parse(id)?);
        }
        Ok(self)
    }

    /// Set the clear-except list.
    pub fn clears_except(mut self, ids: &[&str]) -> Result<Self, IndexingError> {
        let mut keep = Vec::with_capacity(ids.len());
        for id in ids {
            keep.push(StageId::parse(id)?);
        }
        self.clear_except = Some(keep);
        Ok(self)
    }

    /// Set the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marker key.
    pub fn id(&self) -> &str {
        self.stage_id.as_str()
    }
}

/// Per-batch outcome reported by a stage.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StageReport {
    /// Documents marked complete (or acknowledged, for removals)
    pub completed: usize,

    /// Documents skipped without marking (retried next pass)
    pub skipped: usize,

    /// Documents that failed, with the reason
    pub failed: Vec<(DocId, String)>,
}

impl StageReport {
    /// Empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed document.
    pub fn record_success(&mut self) {
        self.completed += 1;
    }

    /// Record a document left pending on purpose.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Record a failed document.
    pub fn record_failure(&mut self, doc_id: impl Into<DocId>, reason: impl ToString) {
        self.failed.push((doc_id.into(), reason.to_string()));
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: StageReport) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }

    /// Total documents handled.
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed.len()
    }
}

/// A pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Static description.
    fn descriptor(&self) -> &StageDescriptor;

    /// Field-change handler registered with the pipeline at construction.
    fn update_fields_handler(&self) -> Option<UpdateFieldsHandler> {
        None
    }

    /// One-time setup. Called once per pipeline lifetime.
    async fn initialize(
        &self,
        _ctx: &OpContext,
        _pipeline: &FullTextPipeline,
    ) -> Result<(), IndexingError> {
        Ok(())
    }

    /// Process documents whose prerequisites are complete.
    ///
    /// Must call `pipeline.update` for every document it completes. Partial
    /// progress is expected; unmarked documents are retried next pass.
    async fn collect(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError>;

    /// Reclaim stage-owned data for tombstoned documents and acknowledge
    /// each through `pipeline.acknowledge_removal`. Must be idempotent.
    async fn remove(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        let mut report = StageReport::new();
        for doc in docs {
            match pipeline
                .acknowledge_removal(ctx, &doc.doc_id, self.descriptor().id())
                .await
            {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&doc.doc_id, e),
            }
        }
        Ok(report)
    }

    /// Stage-local search helper. `None` when the stage owns no index.
    async fn search(
        &self,
        _classes: &[ClassId],
        _query: &SearchQuery,
        _size: usize,
        _from: usize,
        _pipeline: &FullTextPipeline,
    ) -> Result<Option<SearchHits>, IndexingError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = StageDescriptor::parse("fld-v15")
            .unwrap()
            .requires(&["cnt-v3"])
            .unwrap()
            .clears_except(&["cnt-v3", "collab-v1"])
            .unwrap();

        assert_eq!(desc.id(), "fld-v15");
        assert_eq!(desc.require.len(), 1);
        assert_eq!(desc.clear_except.as_ref().map(|c| c.len()), Some(2));
        assert!(desc.enabled);
    }

    #[test]
    fn test_descriptor_rejects_bad_id() {
        assert!(StageDescriptor::parse("content").is_err());
        assert!(StageDescriptor::parse("cnt-v3")
            .unwrap()
            .requires(&["bad id"])
            .is_err());
    }

    #[test]
    fn test_report_merge() {
        let mut a = StageReport::new();
        a.record_success();
        a.record_failure("d2", "backend down");

        let mut b = StageReport::new();
        b.record_success();
        b.record_skip();

        a.merge(b);
        assert_eq!(a.completed, 2);
        assert_eq!(a.skipped, 1);
        assert_eq!(a.failed.len(), 1);
        assert_eq!(a.total(), 4);
    }
}
