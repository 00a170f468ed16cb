//! Pipeline orchestrator.
//!
//! [`FullTextPipeline`] owns the stage chain, the model view (hierarchy and
//! per-class contexts), the propagation resolver, the update queue and the
//! write buffer. Every mutation of a [`DocIndexState`] goes through
//! [`FullTextPipeline::update`], [`FullTextPipeline::add`] or
//! [`FullTextPipeline::mark_remove`], which serialize writes per document.
//!
//! Scheduling passes live in [`crate::pass`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn};

use fulltext_search::SearchBackend;
use fulltext_storage::{DocStateStore, DocumentSource};
use fulltext_types::{
    ClassHierarchy, ClassId, DocId, DocIndexState, DocUpdate, FullTextSearchContext,
    PipelineSettings, QueuedChange, SearchHits, SearchQuery, FULL_TEXT_PUSH_STAGE_PREFIX,
};

use crate::buffer::WriteBuffer;
use crate::context::OpContext;
use crate::error::IndexingError;
use crate::propagation::PropagationResolver;
use crate::queue::UpdateQueue;
use crate::stage::{Stage, UpdateFieldsHandler};

/// Number of per-document lock stripes.
const LOCK_STRIPES: usize = 64;

/// Capacity of the event channel; slow subscribers lag rather than block.
const EVENT_CAPACITY: usize = 1024;

/// Notifications emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A stage marked a document complete
    StageCompleted { doc_id: DocId, stage: String },

    /// A stage failed for a document; it will be retried
    StageFailed {
        doc_id: DocId,
        stage: String,
        reason: String,
    },

    /// Every enabled stage acknowledged the removal of a tombstoned document
    ReadyForPurge(DocId),
}

/// Snapshot of indexing progress.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    /// States in the store
    pub total: usize,

    /// Tombstoned states awaiting purge
    pub removed: usize,

    /// Live states with at least one incomplete stage
    pub pending: usize,

    /// Completed count per enabled stage, in chain order
    pub stages: Vec<(String, usize)>,

    /// Documents waiting in the update queue
    pub queued: usize,
}

pub(crate) struct PipelineInner {
    pub(crate) settings: PipelineSettings,
    pub(crate) store: Arc<dyn DocStateStore>,
    pub(crate) source: Arc<dyn DocumentSource>,
    pub(crate) backend: Arc<dyn SearchBackend>,
    pub(crate) hierarchy: ClassHierarchy,
    pub(crate) contexts: HashMap<ClassId, FullTextSearchContext>,
    pub(crate) propagation: PropagationResolver,

    /// Enabled stages in declaration order
    pub(crate) stages: Vec<Arc<dyn Stage>>,
    pub(crate) stage_ids: Vec<String>,
    pub(crate) configured_ids: BTreeSet<String>,
    stage_index: HashMap<String, usize>,

    /// Transitive `require` set per enabled stage (same order as `stages`)
    require_closure: Vec<BTreeSet<String>>,

    /// Stages that transitively require each stage
    dependents: HashMap<String, BTreeSet<String>>,

    handlers: Vec<UpdateFieldsHandler>,

    pub(crate) queue: UpdateQueue,
    pub(crate) buffer: WriteBuffer,
    locks: Vec<Mutex<()>>,
    flush_lock: Mutex<()>,
    pub(crate) scan_cursor: Mutex<Option<DocId>>,
    pub(crate) in_flight: DashMap<DocId, String>,

    /// Live documents with an incomplete stage, by class. Maintained on
    /// every persist; seeded from the store on first search.
    pending: DashMap<DocId, ClassId>,
    pending_loaded: OnceCell<()>,
    pub(crate) events: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
    initialized: OnceCell<()>,
}

/// The full-text indexing pipeline.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct FullTextPipeline {
    pub(crate) inner: Arc<PipelineInner>,
}

/// Builder for [`FullTextPipeline`]; validates the stage chain on `build`.
pub struct PipelineBuilder {
    store: Arc<dyn DocStateStore>,
    source: Arc<dyn DocumentSource>,
    backend: Arc<dyn SearchBackend>,
    settings: PipelineSettings,
    hierarchy: ClassHierarchy,
    contexts: HashMap<ClassId, FullTextSearchContext>,
    stages: Vec<Arc<dyn Stage>>,
    propagation: Option<PropagationResolver>,
}

impl PipelineBuilder {
    /// Scheduling settings.
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Class hierarchy of the document model.
    pub fn hierarchy(mut self, hierarchy: ClassHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Per-class full-text contexts.
    pub fn contexts(mut self, contexts: HashMap<ClassId, FullTextSearchContext>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Append a stage to the chain.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append several stages to the chain.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Override the propagation maps derived from the contexts.
    pub fn propagation(mut self, resolver: PropagationResolver) -> Self {
        self.propagation = Some(resolver);
        self
    }

    /// Validate the chain and build the pipeline.
    pub fn build(self) -> Result<FullTextPipeline, IndexingError> {
        self.settings.validate().map_err(IndexingError::Config)?;
        self.hierarchy.validate()?;

        // id -> enabled, for every declared stage
        let mut declared: HashMap<String, bool> = HashMap::new();
        let mut names: BTreeSet<String> = BTreeSet::new();

        for stage in &self.stages {
            let desc = stage.descriptor();
            let id = desc.id();
            if declared.contains_key(id) {
                return Err(IndexingError::Config(format!(
                    "duplicate stage identifier {id}"
                )));
            }
            if !names.insert(desc.stage_id.name().to_string()) {
                return Err(IndexingError::Config(format!(
                    "duplicate stage name {}",
                    desc.stage_id.name()
                )));
            }
            for req in &desc.require {
                match declared.get(req.as_str()) {
                    None => {
                        return Err(IndexingError::Config(format!(
                            "stage {id} requires {req}, which is not declared before it"
                        )))
                    }
                    Some(false) if desc.enabled => {
                        return Err(IndexingError::Config(format!(
                            "stage {id} requires disabled stage {req}"
                        )))
                    }
                    _ => {}
                }
            }
            declared.insert(id.to_string(), desc.enabled);
        }

        for stage in &self.stages {
            let desc = stage.descriptor();
            for keep in desc.clear_except.iter().flatten() {
                if !declared.contains_key(keep.as_str()) {
                    return Err(IndexingError::Config(format!(
                        "stage {} preserves unknown stage {keep}",
                        desc.id()
                    )));
                }
            }
        }

        let stages: Vec<Arc<dyn Stage>> = self
            .stages
            .into_iter()
            .filter(|s| s.descriptor().enabled)
            .collect();
        let stage_ids: Vec<String> = stages
            .iter()
            .map(|s| s.descriptor().id().to_string())
            .collect();
        let stage_index: HashMap<String, usize> = stage_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut require_closure: Vec<BTreeSet<String>> = Vec::with_capacity(stages.len());
        for stage in &stages {
            let mut closure = BTreeSet::new();
            for req in &stage.descriptor().require {
                closure.insert(req.to_string());
                if let Some(&idx) = stage_index.get(req.as_str()) {
                    closure.extend(require_closure[idx].iter().cloned());
                }
            }
            require_closure.push(closure);
        }

        let mut dependents: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (idx, closure) in require_closure.iter().enumerate() {
            for req in closure {
                dependents
                    .entry(req.clone())
                    .or_default()
                    .insert(stage_ids[idx].clone());
            }
        }

        let handlers: Vec<UpdateFieldsHandler> = stages
            .iter()
            .filter_map(|s| s.update_fields_handler())
            .collect();

        let propagation = self.propagation.unwrap_or_else(|| {
            PropagationResolver::from_contexts(self.hierarchy.clone(), &self.contexts)
        });

        info!(
            stages = ?stage_ids,
            handlers = handlers.len(),
            "Pipeline configured"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = PipelineInner {
            configured_ids: stage_ids.iter().cloned().collect(),
            buffer: WriteBuffer::new(self.settings.write_buffer_limit),
            settings: self.settings,
            store: self.store,
            source: self.source,
            backend: self.backend,
            hierarchy: self.hierarchy,
            contexts: self.contexts,
            propagation,
            stages,
            stage_ids,
            stage_index,
            require_closure,
            dependents,
            handlers,
            queue: UpdateQueue::new(),
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            flush_lock: Mutex::new(()),
            scan_cursor: Mutex::new(None),
            in_flight: DashMap::new(),
            pending: DashMap::new(),
            pending_loaded: OnceCell::new(),
            events,
            cancel: CancellationToken::new(),
            initialized: OnceCell::new(),
        };

        Ok(FullTextPipeline {
            inner: Arc::new(inner),
        })
    }
}

impl FullTextPipeline {
    /// Start building a pipeline over the given collaborators.
    pub fn builder(
        store: Arc<dyn DocStateStore>,
        source: Arc<dyn DocumentSource>,
        backend: Arc<dyn SearchBackend>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            store,
            source,
            backend,
            settings: PipelineSettings::default(),
            hierarchy: ClassHierarchy::new(),
            contexts: HashMap::new(),
            stages: Vec::new(),
            propagation: None,
        }
    }

    /// Scheduling settings.
    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// State store.
    pub fn store(&self) -> &dyn DocStateStore {
        self.inner.store.as_ref()
    }

    /// Document collaborator.
    pub fn source(&self) -> &dyn DocumentSource {
        self.inner.source.as_ref()
    }

    /// Search backend.
    pub fn backend(&self) -> &dyn SearchBackend {
        self.inner.backend.as_ref()
    }

    /// Class hierarchy.
    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.inner.hierarchy
    }

    /// Nearest context for a class.
    pub fn find_context(&self, class: &str) -> Option<&FullTextSearchContext> {
        self.inner.hierarchy.find_context(&self.inner.contexts, class)
    }

    /// Enabled stage identifiers in chain order.
    pub fn stage_ids(&self) -> &[String] {
        &self.inner.stage_ids
    }

    /// Fresh operation context bound to the pipeline's cancellation.
    pub fn context(&self) -> OpContext {
        OpContext::new(info_span!("pipeline"), self.inner.cancel.child_token())
    }

    /// Request cooperative shutdown. In-flight batches finish; no new ones
    /// start.
    pub fn cancel(&self) {
        info!("Pipeline cancellation requested");
        self.inner.cancel.cancel();
    }

    /// True once [`FullTextPipeline::cancel`] was called.
    pub fn is_cancelling(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn lock_for(&self, doc_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        doc_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.inner.locks.len();
        &self.inner.locks[idx]
    }

    /// Current state of a document, including buffered changes.
    pub fn get_state(&self, doc_id: &str) -> Result<Option<DocIndexState>, IndexingError> {
        if let Some(state) = self.inner.buffer.get(doc_id) {
            return Ok(Some(state));
        }
        Ok(self.inner.store.get_state(doc_id)?)
    }

    /// True if every enabled stage is complete (or acknowledged) for `state`.
    pub(crate) fn is_fully_processed(&self, state: &DocIndexState) -> bool {
        state.all_complete(self.inner.stage_ids.iter().map(String::as_str))
    }

    /// Index of the first enabled stage that is incomplete and runnable.
    pub(crate) fn next_runnable(&self, state: &DocIndexState) -> Option<usize> {
        self.inner.stages.iter().enumerate().find_map(|(idx, stage)| {
            let desc = stage.descriptor();
            let runnable = !state.is_stage_complete(desc.id())
                && state.all_complete(desc.require.iter().map(|r| r.as_str()));
            runnable.then_some(idx)
        })
    }

    /// Persist every buffered state.
    pub async fn flush(&self) -> Result<usize, IndexingError> {
        let _guard = self.inner.flush_lock.lock().await;
        Ok(self.inner.buffer.flush(self.inner.store.as_ref())?)
    }

    /// Live with at least one incomplete enabled stage.
    fn is_pending(&self, state: &DocIndexState) -> bool {
        !state.removed && !self.is_fully_processed(state)
    }

    fn track(&self, state: &DocIndexState) {
        if self.is_pending(state) {
            self.inner
                .pending
                .insert(state.doc_id.clone(), state.object_class.clone());
        } else {
            self.inner.pending.remove(&state.doc_id);
        }
    }

    /// Callers hold the document's lock.
    async fn persist(&self, state: DocIndexState, flush: bool) -> Result<(), IndexingError> {
        self.track(&state);
        let full = self.inner.buffer.stage(state);
        if flush || full {
            self.flush().await?;
        }
        Ok(())
    }

    /// Delete tombstoned states from the store.
    pub(crate) async fn purge(&self, doc_ids: &[DocId]) -> Result<usize, IndexingError> {
        let _guard = self.inner.flush_lock.lock().await;
        for id in doc_ids {
            self.inner.buffer.discard(id);
            self.inner.pending.remove(id);
        }
        Ok(self.inner.store.delete_states(doc_ids)?)
    }

    /// Run every enabled stage's `initialize` once.
    pub async fn initialize(&self, ctx: &OpContext) -> Result<(), IndexingError> {
        self.inner
            .initialized
            .get_or_try_init(|| async {
                for stage in &self.inner.stages {
                    debug!(parent: ctx.span(), stage = %stage.descriptor().id(), "Initializing stage");
                    stage.initialize(ctx, self).await?;
                }
                info!(parent: ctx.span(), stages = self.inner.stages.len(), "Pipeline initialized");
                Ok::<(), IndexingError>(())
            })
            .await?;
        Ok(())
    }

    /// Register a newly observed document.
    ///
    /// Returns false (and changes nothing) when the document is already known.
    pub async fn add(&self, ctx: &OpContext, state: DocIndexState) -> Result<bool, IndexingError> {
        let _guard = self.lock_for(&state.doc_id).lock().await;
        if self.get_state(&state.doc_id)?.is_some() {
            trace!(parent: ctx.span(), doc_id = %state.doc_id, "Document already known");
            return Ok(false);
        }
        debug!(parent: ctx.span(), doc_id = %state.doc_id, class = %state.object_class, "Document added");
        self.persist(state, false).await?;
        Ok(true)
    }

    /// Atomically apply a partial update to one document.
    ///
    /// `mark = true` records forward progress of `update.stage` (its
    /// prerequisites must be complete); `mark = false` rolls the stage back
    /// together with every stage that depends on it. With `flush` the state
    /// is durable when the call resolves.
    ///
    /// Updates to tombstoned documents are ignored.
    pub async fn update(
        &self,
        ctx: &OpContext,
        doc_id: &str,
        mark: bool,
        update: DocUpdate,
        flush: bool,
    ) -> Result<DocIndexState, IndexingError> {
        let _guard = self.lock_for(doc_id).lock().await;
        let before = self
            .get_state(doc_id)?
            .ok_or_else(|| IndexingError::UnknownDocument(doc_id.to_string()))?;

        if before.removed {
            debug!(parent: ctx.span(), doc_id = %doc_id, "Ignoring update to removed document");
            return Ok(before);
        }

        let mut update = update;
        let stage_idx = match update.stage.as_deref() {
            Some(stage) => Some(
                *self
                    .inner
                    .stage_index
                    .get(stage)
                    .ok_or_else(|| IndexingError::stage(stage, "stage is not configured"))?,
            ),
            None if mark => {
                return Err(IndexingError::Config(
                    "marking an update requires a stage".to_string(),
                ))
            }
            None => None,
        };

        if let (true, Some(idx)) = (mark, stage_idx) {
            let desc = self.inner.stages[idx].descriptor();
            if !before.all_complete(desc.require.iter().map(|r| r.as_str())) {
                return Err(IndexingError::RequirementsNotMet {
                    doc_id: doc_id.to_string(),
                    stage: desc.id().to_string(),
                });
            }
        }

        if update.changes_fields_of(&before) {
            for handler in &self.inner.handlers {
                handler(&before, &mut update);
            }
        }

        let mut state = before;
        update.apply_fields(&mut state);

        let mut cleared: BTreeSet<String> = BTreeSet::new();
        if let Some(idx) = stage_idx {
            let stage_id = self.inner.stage_ids[idx].clone();
            if mark {
                state.mark_stage(&stage_id, update.payload.clone());
                if let Some(keep) = &self.inner.stages[idx].descriptor().clear_except {
                    let survivors: BTreeSet<&str> = keep
                        .iter()
                        .map(|k| k.as_str())
                        .chain(std::iter::once(stage_id.as_str()))
                        .chain(self.inner.require_closure[idx].iter().map(String::as_str))
                        .collect();
                    for id in &self.inner.stage_ids {
                        if !survivors.contains(id.as_str()) && state.clear_stage(id) {
                            cleared.insert(id.clone());
                        }
                    }
                }
            } else {
                self.clear_cascading(&mut state, &stage_id, &mut cleared);
            }
        }

        for id in &update.clear_stages {
            self.clear_cascading(&mut state, id, &mut cleared);
        }

        if !cleared.is_empty() {
            debug!(parent: ctx.span(), doc_id = %doc_id, cleared = ?cleared, "Cleared stage markers");
        }

        state.touch();
        self.persist(state.clone(), flush).await?;

        if let (true, Some(stage)) = (mark, update.stage.as_ref()) {
            if state.is_stage_complete(stage) {
                trace!(parent: ctx.span(), doc_id = %doc_id, stage = %stage, "Stage complete");
                self.emit(PipelineEvent::StageCompleted {
                    doc_id: doc_id.to_string(),
                    stage: stage.clone(),
                });
            }
        }
        Ok(state)
    }

    /// Clear `stage_id` and every stage that transitively requires it.
    fn clear_cascading(
        &self,
        state: &mut DocIndexState,
        stage_id: &str,
        cleared: &mut BTreeSet<String>,
    ) {
        if state.clear_stage(stage_id) {
            cleared.insert(stage_id.to_string());
        }
        if let Some(deps) = self.inner.dependents.get(stage_id) {
            for dep in deps {
                if state.clear_stage(dep) {
                    cleared.insert(dep.clone());
                }
            }
        }
    }

    /// Tombstone a document and queue propagation to related documents.
    ///
    /// Returns false if the document was already removed.
    pub async fn mark_remove(&self, ctx: &OpContext, doc_id: &str) -> Result<bool, IndexingError> {
        let Some(state) = self.tombstone(ctx, doc_id).await? else {
            return Ok(false);
        };

        let planned = self
            .inner
            .propagation
            .plan(&[(state, QueuedChange::removed())], self.source())?;
        self.inner.queue.extend(planned);
        Ok(true)
    }

    /// Set the tombstone and clear every marker. `None` when already removed.
    pub(crate) async fn tombstone(
        &self,
        ctx: &OpContext,
        doc_id: &str,
    ) -> Result<Option<DocIndexState>, IndexingError> {
        let _guard = self.lock_for(doc_id).lock().await;
        let mut state = self
            .get_state(doc_id)?
            .ok_or_else(|| IndexingError::UnknownDocument(doc_id.to_string()))?;

        if state.removed {
            trace!(parent: ctx.span(), doc_id = %doc_id, "Already removed");
            return Ok(None);
        }

        state.mark_removed();
        state.clear_all_stages();
        state.touch();
        self.persist(state.clone(), true).await?;
        info!(parent: ctx.span(), doc_id = %doc_id, "Document tombstoned");
        Ok(Some(state))
    }

    /// Record that `stage_id` reclaimed its data for a tombstoned document.
    ///
    /// Returns true once every enabled stage has acknowledged.
    pub async fn acknowledge_removal(
        &self,
        ctx: &OpContext,
        doc_id: &str,
        stage_id: &str,
    ) -> Result<bool, IndexingError> {
        let _guard = self.lock_for(doc_id).lock().await;
        let mut state = self
            .get_state(doc_id)?
            .ok_or_else(|| IndexingError::UnknownDocument(doc_id.to_string()))?;

        if !state.removed {
            return Err(IndexingError::stage(
                stage_id,
                format!("{doc_id} is not removed"),
            ));
        }
        if !state.is_stage_complete(stage_id) {
            state.mark_stage(stage_id, None);
            state.touch();
            self.persist(state.clone(), false).await?;
            trace!(parent: ctx.span(), doc_id = %doc_id, stage = %stage_id, "Removal acknowledged");
        }
        Ok(self.is_fully_processed(&state))
    }

    /// Reset every marker of a live document so the chain re-runs.
    ///
    /// Creates the state from the source when the pipeline has not seen the
    /// document yet.
    pub(crate) async fn reset(
        &self,
        ctx: &OpContext,
        doc_id: &str,
    ) -> Result<Option<DocIndexState>, IndexingError> {
        let _guard = self.lock_for(doc_id).lock().await;
        let state = match self.get_state(doc_id)? {
            Some(state) if state.removed => {
                debug!(parent: ctx.span(), doc_id = %doc_id, "Skipping update of removed document");
                return Ok(None);
            }
            Some(mut state) => {
                state.clear_all_stages();
                state
            }
            None => match self.inner.source.get_document(doc_id)? {
                Some(doc) => doc.initial_state(),
                None => {
                    warn!(parent: ctx.span(), doc_id = %doc_id, "Update for unknown document");
                    return Ok(None);
                }
            },
        };

        let mut state = state;
        state.touch();
        self.persist(state.clone(), false).await?;
        Ok(Some(state))
    }

    /// Drop markers of stages that are no longer configured.
    pub(crate) async fn drop_stale_markers(&self, doc_id: &str) -> Result<(), IndexingError> {
        let _guard = self.lock_for(doc_id).lock().await;
        let Some(mut state) = self.get_state(doc_id)? else {
            return Ok(());
        };
        let stale = state.retain_stages(&self.inner.configured_ids);
        if !stale.is_empty() {
            debug!(doc_id = %doc_id, stale = ?stale, "Dropped stale stage markers");
            self.persist(state, false).await?;
        }
        Ok(())
    }

    /// Queue change notifications for the next pass.
    pub fn queue(
        &self,
        ctx: &OpContext,
        changes: impl IntoIterator<Item = (DocId, QueuedChange)>,
    ) {
        let before = self.inner.queue.len();
        self.inner.queue.extend(changes);
        trace!(parent: ctx.span(), before, after = self.inner.queue.len(), "Changes queued");
    }

    /// Search documents of `classes` (and their subclasses); an empty
    /// `classes` searches every class.
    ///
    /// `pass = true` when no push stage is configured, when the stage says
    /// so, or when a live document in scope has not completed every enabled
    /// stage. Tombstoned documents never appear in the results and never
    /// shorten a page: hits are over-fetched past them before `from`/`size`
    /// are applied. Backend failures are returned as errors.
    pub async fn search(
        &self,
        classes: &[ClassId],
        query: &SearchQuery,
        size: usize,
        from: usize,
    ) -> Result<SearchHits, IndexingError> {
        let Some(stage) = self
            .inner
            .stages
            .iter()
            .find(|s| s.descriptor().id().starts_with(FULL_TEXT_PUSH_STAGE_PREFIX))
        else {
            debug!("No full-text push stage configured");
            return Ok(SearchHits::pass_through());
        };

        let wanted = from.saturating_add(size);
        let mut window = wanted;
        let (live, stage_pass) = loop {
            let hits = match stage.search(classes, query, window, 0, self).await? {
                Some(hits) => hits,
                None => SearchHits::complete(
                    self.inner.backend.search(classes, query, window, 0).await?,
                ),
            };
            let fetched = hits.docs.len();

            let mut live = Vec::with_capacity(fetched);
            for doc in hits.docs {
                match self.get_state(&doc.id)? {
                    Some(state) if state.removed => continue,
                    _ => live.push(doc),
                }
            }

            let dropped = fetched - live.len();
            if dropped == 0 || live.len() >= wanted || fetched < window {
                break (live, hits.pass);
            }
            trace!(dropped, window, "Widening search window past tombstones");
            window = window.saturating_add(dropped);
        };

        let incomplete = self.has_incomplete(classes).await?;
        Ok(SearchHits {
            docs: live.into_iter().skip(from).take(size).collect(),
            pass: stage_pass || incomplete,
        })
    }

    /// Seed the pending index from the store once per process.
    async fn load_pending(&self) -> Result<(), IndexingError> {
        const PAGE: usize = 1000;
        self.inner
            .pending_loaded
            .get_or_try_init(|| async {
                let mut after: Option<DocId> = None;
                loop {
                    let page = self.inner.store.scan_states(after.as_deref(), PAGE)?;
                    let Some(last) = page.last() else {
                        break;
                    };
                    after = Some(last.doc_id.clone());
                    let short = page.len() < PAGE;
                    for stored in page {
                        let state = self.inner.buffer.get(&stored.doc_id).unwrap_or(stored);
                        if self.is_pending(&state) {
                            self.inner
                                .pending
                                .insert(state.doc_id.clone(), state.object_class.clone());
                        }
                    }
                    if short {
                        break;
                    }
                }
                debug!(pending = self.inner.pending.len(), "Pending index loaded");
                Ok::<(), IndexingError>(())
            })
            .await?;
        Ok(())
    }

    async fn has_incomplete(&self, classes: &[ClassId]) -> Result<bool, IndexingError> {
        self.load_pending().await?;

        let scope: Option<BTreeSet<ClassId>> = (!classes.is_empty()).then(|| {
            classes
                .iter()
                .flat_map(|c| self.inner.hierarchy.descendants(c))
                .collect()
        });
        let candidates: Vec<DocId> = self
            .inner
            .pending
            .iter()
            .filter(|e| scope.as_ref().map_or(true, |s| s.contains(e.value())))
            .map(|e| e.key().clone())
            .collect();

        // Seeding can race a persist and leave a finished entry behind
        for doc_id in candidates {
            if let Some(state) = self.get_state(&doc_id)? {
                if self.is_pending(&state) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Per-stage completion counts over every stored state.
    pub async fn stats(&self) -> Result<PipelineStats, IndexingError> {
        const PAGE: usize = 1000;
        self.flush().await?;

        let mut stats = PipelineStats {
            stages: self.inner.stage_ids.iter().map(|id| (id.clone(), 0)).collect(),
            queued: self.inner.queue.len(),
            ..Default::default()
        };

        let mut after: Option<DocId> = None;
        loop {
            let page = self.inner.store.scan_states(after.as_deref(), PAGE)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.doc_id.clone());

            for state in &page {
                stats.total += 1;
                if state.removed {
                    stats.removed += 1;
                    continue;
                }
                if !self.is_fully_processed(state) {
                    stats.pending += 1;
                }
                for (id, count) in stats.stages.iter_mut() {
                    if state.is_stage_complete(id) {
                        *count += 1;
                    }
                }
            }
            if page.len() < PAGE {
                break;
            }
        }
        Ok(stats)
    }
}
