//! End-to-end test infrastructure for the full-text pipeline.
//!
//! Provides a shared TestHarness (RocksDB state store plus Tantivy index in a
//! temp dir), scripted stages that record every invocation, and helpers for
//! feeding documents through the pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fulltext_indexer::{
    FullTextPipeline, IndexingError, OpContext, PassReport, PipelineBuilder, Stage,
    StageDescriptor, StageReport,
};
use fulltext_search::{SearchBackend, SearchError, SearchIndexConfig, TantivyBackend};
use fulltext_storage::Storage;
use fulltext_types::{
    ClassHierarchy, ClassId, ContentBlob, DocId, DocIndexState, DocUpdate, FullTextSearchContext,
    IndexedDoc, QueuedChange, SearchQuery, SourceDoc,
};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// State store and document source
    pub storage: Arc<Storage>,
    /// Tantivy search backend
    pub backend: Arc<TantivyBackend>,
}

impl TestHarness {
    /// Create a new harness with temp storage and index.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let backend = Arc::new(
            TantivyBackend::open(SearchIndexConfig::new(temp_dir.path().join("index")))
                .expect("Failed to open test index"),
        );

        Self {
            _temp_dir: temp_dir,
            storage,
            backend,
        }
    }

    /// Pipeline builder over the harness collaborators and the test model.
    pub fn builder(&self) -> PipelineBuilder {
        self.builder_with_backend(self.backend.clone())
    }

    /// Pipeline builder with a substitute search backend.
    pub fn builder_with_backend(&self, backend: Arc<dyn SearchBackend>) -> PipelineBuilder {
        FullTextPipeline::builder(self.storage.clone(), self.storage.clone(), backend)
            .hierarchy(test_hierarchy())
            .contexts(test_contexts())
    }

    /// Store source documents and queue them as created or updated.
    pub fn submit(&self, pipeline: &FullTextPipeline, docs: &[SourceDoc]) {
        let ctx = pipeline.context();
        let mut changes = Vec::with_capacity(docs.len());
        for doc in docs {
            self.storage
                .put_document(doc)
                .expect("Failed to store document");
            let known = pipeline
                .get_state(&doc.id)
                .expect("Failed to read state")
                .is_some();
            let change = if known {
                QueuedChange::updated()
            } else {
                QueuedChange::created(doc.initial_state())
            };
            changes.push((doc.id.clone(), change));
        }
        pipeline.queue(&ctx, changes);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// `doc` ← `task`, `doc` ← `comment`.
pub fn test_hierarchy() -> ClassHierarchy {
    ClassHierarchy::new()
        .with_class("doc", None)
        .with_class("task", Some("doc"))
        .with_class("comment", Some("doc"))
}

/// Comments propagate to their task; tasks summarize their comments.
pub fn test_contexts() -> std::collections::HashMap<ClassId, FullTextSearchContext> {
    let mut contexts = std::collections::HashMap::new();
    contexts.insert(
        "comment".to_string(),
        FullTextSearchContext {
            propagate: vec!["task".to_string()],
            ..Default::default()
        },
    );
    contexts.insert(
        "task".to_string(),
        FullTextSearchContext {
            full_text_summary: true,
            child_processing_allowed: true,
            ..Default::default()
        },
    );
    contexts
}

/// A task with a title and a plain-text body.
pub fn task(id: &str, title: &str) -> SourceDoc {
    SourceDoc::new(id, "task")
        .in_space("sp1")
        .with_attribute("title", title)
        .with_content(ContentBlob::new("body", "text/plain", format!("Body of {title}")))
}

/// A comment attached to `task_id`.
pub fn comment(id: &str, task_id: &str, message: &str) -> SourceDoc {
    SourceDoc::new(id, "comment")
        .in_space("sp1")
        .attached(task_id, "task")
        .with_attribute("message", message)
}

/// Run passes until idle and fold the reports.
pub async fn run_to_idle(pipeline: &FullTextPipeline) -> PassReport {
    let ctx = pipeline.context();
    let mut total = PassReport::default();
    for report in pipeline
        .run_until_idle(&ctx, 100)
        .await
        .expect("Pass failed")
    {
        total.merge(report);
    }
    total
}

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub stage: String,
    pub doc_id: DocId,
    pub removal: bool,
    /// Every `require` entry was complete in the stored state at call time
    pub requirements_met: bool,
}

/// Shared log of stage invocations.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: Call) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// `collect` invocations of `stage` for `doc_id`.
    pub fn collects(&self, stage: &str, doc_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| !c.removal && c.stage == stage && c.doc_id == doc_id)
            .count()
    }

    /// `remove` invocations of `stage` for `doc_id`.
    pub fn removals(&self, stage: &str, doc_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.removal && c.stage == stage && c.doc_id == doc_id)
            .count()
    }

    /// `collect` calls made while a requirement was incomplete.
    pub fn violations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !c.removal && !c.requirements_met)
            .collect()
    }
}

/// Stage that marks every document it sees, recording each call.
///
/// Failures and delays are scripted per test.
pub struct ScriptedStage {
    descriptor: StageDescriptor,
    log: CallLog,
    failing: Arc<Mutex<HashSet<DocId>>>,
    delay: Option<Duration>,
}

impl ScriptedStage {
    pub fn new(id: &str, requires: &[&str], log: &CallLog) -> Self {
        Self {
            descriptor: StageDescriptor::parse(id)
                .and_then(|d| d.requires(requires))
                .expect("Invalid scripted stage"),
            log: log.clone(),
            failing: Arc::new(Mutex::new(HashSet::new())),
            delay: None,
        }
    }

    pub fn clears_except(mut self, keep: &[&str]) -> Self {
        self.descriptor = self
            .descriptor
            .clears_except(keep)
            .expect("Invalid clear_except");
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.enabled(enabled);
        self
    }

    /// Sleep before processing each batch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle to the set of documents this stage fails on.
    pub fn failures(&self) -> Arc<Mutex<HashSet<DocId>>> {
        self.failing.clone()
    }

    fn is_failing(&self, doc_id: &str) -> bool {
        self.failing
            .lock()
            .expect("failure set poisoned")
            .contains(doc_id)
    }

    fn requirements_met(&self, state: Option<&DocIndexState>) -> bool {
        state.is_some_and(|s| s.all_complete(self.descriptor.require.iter().map(|r| r.as_str())))
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn collect(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut report = StageReport::new();
        for doc in docs {
            let current = pipeline.get_state(&doc.doc_id)?;
            self.log.push(Call {
                stage: self.descriptor.id().to_string(),
                doc_id: doc.doc_id.clone(),
                removal: false,
                requirements_met: self.requirements_met(current.as_ref()),
            });

            if self.is_failing(&doc.doc_id) {
                report.record_failure(&doc.doc_id, "scripted failure");
                continue;
            }

            let update = DocUpdate::for_stage(self.descriptor.id());
            match pipeline.update(ctx, &doc.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&doc.doc_id, e),
            }
        }
        Ok(report)
    }

    async fn remove(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        let mut report = StageReport::new();
        for doc in docs {
            self.log.push(Call {
                stage: self.descriptor.id().to_string(),
                doc_id: doc.doc_id.clone(),
                removal: true,
                requirements_met: true,
            });
            match pipeline
                .acknowledge_removal(ctx, &doc.doc_id, self.descriptor.id())
                .await
            {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&doc.doc_id, e),
            }
        }
        Ok(report)
    }
}

/// Backend that is always down.
pub struct UnavailableBackend;

#[async_trait]
impl SearchBackend for UnavailableBackend {
    async fn upsert(&self, _docs: Vec<IndexedDoc>) -> Result<usize, SearchError> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn remove(&self, _ids: &[String]) -> Result<usize, SearchError> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn search(
        &self,
        _classes: &[ClassId],
        _query: &SearchQuery,
        _size: usize,
        _from: usize,
    ) -> Result<Vec<IndexedDoc>, SearchError> {
        Err(SearchError::Unavailable("connection refused".into()))
    }

    async fn count(&self) -> Result<u64, SearchError> {
        Err(SearchError::Unavailable("connection refused".into()))
    }
}
