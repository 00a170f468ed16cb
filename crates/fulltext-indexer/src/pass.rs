//! Scheduling passes.
//!
//! A pass drains the update queue, applies the changes, plans propagation,
//! selects pending documents from the store and runs each document's next
//! runnable stage. Tombstoned documents go to the `remove` of every stage
//! that has not acknowledged them yet. Stage batches run concurrently on up
//! to `workers` tasks, each bounded by `stage_timeout_ms`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use fulltext_types::{ChangeKind, DocId, DocIndexState, QueuedChange};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::{FullTextPipeline, PipelineEvent};
use crate::stage::StageReport;

/// Outcome of one scheduling pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PassReport {
    /// Queued changes applied
    pub applied: usize,

    /// Documents re-enqueued by propagation (processed next pass)
    pub propagated: Vec<DocId>,

    /// Pending documents picked up
    pub selected: usize,

    /// Documents completed per stage
    pub processed: BTreeMap<String, usize>,

    /// Failures per stage
    pub failed: BTreeMap<String, Vec<(DocId, String)>>,

    /// Tombstoned documents every stage acknowledged
    pub purged: Vec<DocId>,

    /// Scheduling stopped early because of cancellation
    pub cancelled: bool,
}

impl PassReport {
    /// True when the pass found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.applied == 0 && self.propagated.is_empty() && self.selected == 0
    }

    /// Total documents completed across stages.
    pub fn processed_total(&self) -> usize {
        self.processed.values().sum()
    }

    /// Total failures across stages.
    pub fn failed_total(&self) -> usize {
        self.failed.values().map(Vec::len).sum()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: PassReport) {
        self.applied += other.applied;
        self.propagated.extend(other.propagated);
        self.selected += other.selected;
        for (stage, count) in other.processed {
            *self.processed.entry(stage).or_default() += count;
        }
        for (stage, failures) in other.failed {
            self.failed.entry(stage).or_default().extend(failures);
        }
        self.purged.extend(other.purged);
        self.cancelled |= other.cancelled;
    }

    fn record(&mut self, stage: &str, report: StageReport) {
        *self.processed.entry(stage.to_string()).or_default() += report.completed;
        if !report.failed.is_empty() {
            self.failed
                .entry(stage.to_string())
                .or_default()
                .extend(report.failed);
        }
    }
}

/// Work unit: one stage, one direction, up to `batch_size` documents.
struct Batch {
    stage_idx: usize,
    removal: bool,
    docs: Vec<DocIndexState>,
}

impl FullTextPipeline {
    /// Run one scheduling pass.
    pub async fn run_pass(&self, ctx: &OpContext) -> Result<PassReport, IndexingError> {
        let span = info_span!(parent: ctx.span(), "pass");
        let pass_ctx = ctx.child(span.clone());
        self.run_pass_inner(&pass_ctx).instrument(span).await
    }

    async fn run_pass_inner(&self, ctx: &OpContext) -> Result<PassReport, IndexingError> {
        let mut report = PassReport::default();
        if ctx.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        self.initialize(ctx).await?;

        let changed = self.apply_queued(ctx, &mut report).await?;
        if !changed.is_empty() {
            match self.inner.propagation.plan(&changed, self.source()) {
                Ok(planned) => {
                    report.propagated = planned.iter().map(|(id, _)| id.clone()).collect();
                    self.inner.queue.extend(planned);
                }
                Err(e) => warn!(error = %e, "Propagation planning failed"),
            }
        }

        self.flush().await?;
        let (selected, purge_ready) = self.select_pending().await?;
        report.selected = selected.len();

        let selected_ids: Vec<DocId> = selected.iter().map(|s| s.doc_id.clone()).collect();
        let mut removal_ids: BTreeSet<DocId> = purge_ready.into_iter().collect();
        let batches = self.plan_batches(selected, &mut removal_ids);

        let outcome = self.run_batches(ctx, batches, &mut report).await;
        for id in &selected_ids {
            self.inner.in_flight.remove(id);
        }
        outcome?;

        self.flush().await?;
        report.purged = self.purge_acknowledged(&removal_ids).await?;

        if !report.is_idle() {
            info!(
                applied = report.applied,
                selected = report.selected,
                processed = report.processed_total(),
                failed = report.failed_total(),
                propagated = report.propagated.len(),
                purged = report.purged.len(),
                "Pass complete"
            );
        }
        Ok(report)
    }

    /// Drain the queue and apply each change.
    ///
    /// Returns the states that changed, for propagation.
    async fn apply_queued(
        &self,
        ctx: &OpContext,
        report: &mut PassReport,
    ) -> Result<Vec<(DocIndexState, QueuedChange)>, IndexingError> {
        let drained = self.inner.queue.drain(self.inner.settings.max_docs_per_pass);
        let mut changed = Vec::with_capacity(drained.len());

        for (doc_id, change) in drained {
            let applied = match change.kind() {
                ChangeKind::Remove => match self.tombstone(ctx, &doc_id).await {
                    Err(IndexingError::UnknownDocument(_)) => {
                        debug!(doc_id = %doc_id, "Removal of unknown document ignored");
                        None
                    }
                    other => other?,
                },
                ChangeKind::Create => {
                    let added = match change.create.clone() {
                        Some(state) => self.add(ctx, state).await?,
                        None => false,
                    };
                    if added {
                        self.get_state(&doc_id)?
                    } else if change.updated {
                        self.reset(ctx, &doc_id).await?
                    } else {
                        None
                    }
                }
                ChangeKind::Update => self.reset(ctx, &doc_id).await?,
            };

            if let Some(state) = applied {
                report.applied += 1;
                changed.push((state, change));
            }
        }
        Ok(changed)
    }

    /// Pick up to `max_docs_per_pass` pending documents, continuing from
    /// where the previous pass stopped and wrapping around once.
    ///
    /// Also returns tombstoned documents that are already fully
    /// acknowledged.
    async fn select_pending(&self) -> Result<(Vec<DocIndexState>, Vec<DocId>), IndexingError> {
        let limit = self.inner.settings.max_docs_per_pass;
        let page_size = limit.max(self.inner.settings.batch_size);

        let mut cursor = self.inner.scan_cursor.lock().await;
        let start = cursor.clone();
        let mut after = start.clone();
        let mut wrapped = false;
        let mut selected = Vec::new();
        let mut purge_ready = Vec::new();
        let mut stale = Vec::new();

        'scan: loop {
            let page = self.inner.store.scan_states(after.as_deref(), page_size)?;
            let exhausted = page.len() < page_size;

            for stored in page {
                if wrapped
                    && start
                        .as_deref()
                        .is_some_and(|s| stored.doc_id.as_str() > s)
                {
                    break 'scan;
                }
                after = Some(stored.doc_id.clone());

                let state = self.inner.buffer.get(&stored.doc_id).unwrap_or(stored);
                if self.inner.in_flight.contains_key(&state.doc_id) {
                    continue;
                }
                if state
                    .stage_state
                    .keys()
                    .any(|k| !self.inner.configured_ids.contains(k))
                {
                    stale.push(state.doc_id.clone());
                }

                let mut state = state;
                state.retain_stages(&self.inner.configured_ids);
                if self.is_fully_processed(&state) {
                    if state.removed {
                        purge_ready.push(state.doc_id.clone());
                    }
                    continue;
                }

                selected.push(state);
                if selected.len() >= limit {
                    break 'scan;
                }
            }

            if exhausted {
                if wrapped || start.is_none() {
                    after = None;
                    break;
                }
                wrapped = true;
                after = None;
            }
        }
        for state in &selected {
            self.inner
                .in_flight
                .insert(state.doc_id.clone(), String::new());
        }
        *cursor = after;
        drop(cursor);

        for doc_id in stale {
            if let Err(e) = self.drop_stale_markers(&doc_id).await {
                for state in &selected {
                    self.inner.in_flight.remove(&state.doc_id);
                }
                return Err(e);
            }
        }

        debug!(
            selected = selected.len(),
            purge_ready = purge_ready.len(),
            "Selected pending documents"
        );
        Ok((selected, purge_ready))
    }

    /// Group selected documents into per-stage batches.
    fn plan_batches(
        &self,
        selected: Vec<DocIndexState>,
        removal_ids: &mut BTreeSet<DocId>,
    ) -> Vec<Batch> {
        let mut groups: BTreeMap<(usize, bool), Vec<DocIndexState>> = BTreeMap::new();

        for state in selected {
            if state.removed {
                removal_ids.insert(state.doc_id.clone());
                for (idx, id) in self.inner.stage_ids.iter().enumerate() {
                    if !state.is_stage_complete(id) {
                        groups.entry((idx, true)).or_default().push(state.clone());
                    }
                }
                continue;
            }

            match self.next_runnable(&state) {
                Some(idx) => {
                    if let Some(mut entry) = self.inner.in_flight.get_mut(&state.doc_id) {
                        *entry = self.inner.stage_ids[idx].clone();
                    }
                    groups.entry((idx, false)).or_default().push(state);
                }
                None => debug!(doc_id = %state.doc_id, "No runnable stage"),
            }
        }

        let batch_size = self.inner.settings.batch_size;
        groups
            .into_iter()
            .flat_map(|((stage_idx, removal), docs)| {
                docs.chunks(batch_size)
                    .map(|chunk| Batch {
                        stage_idx,
                        removal,
                        docs: chunk.to_vec(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Run batches on the worker pool; stops starting new batches once
    /// cancelled and always waits for the started ones.
    async fn run_batches(
        &self,
        ctx: &OpContext,
        batches: Vec<Batch>,
        report: &mut PassReport,
    ) -> Result<(), IndexingError> {
        let semaphore = Arc::new(Semaphore::new(self.inner.settings.workers));
        let timeout = Duration::from_millis(self.inner.settings.stage_timeout_ms);
        let mut tasks = JoinSet::new();

        for batch in batches {
            if ctx.is_cancelled() {
                info!("Cancellation requested, not starting further batches");
                report.cancelled = true;
                break;
            }
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| IndexingError::Cancelled)?
                }
                _ = ctx.cancel_token().cancelled() => {
                    report.cancelled = true;
                    break;
                }
            };

            let stage = self.inner.stages[batch.stage_idx].clone();
            let stage_id = stage.descriptor().id().to_string();
            let span = info_span!(
                parent: ctx.span(),
                "stage",
                stage = %stage_id,
                removal = batch.removal,
                count = batch.docs.len()
            );
            let task_ctx = ctx.child(span.clone());
            let pipeline = self.clone();

            tasks.spawn(
                async move {
                    let _permit = permit;
                    let doc_ids: Vec<DocId> = batch.docs.iter().map(|d| d.doc_id.clone()).collect();
                    let work = async {
                        if batch.removal {
                            stage.remove(&batch.docs, &pipeline, &task_ctx).await
                        } else {
                            stage.collect(&batch.docs, &pipeline, &task_ctx).await
                        }
                    };
                    let result = match tokio::time::timeout(timeout, work).await {
                        Ok(result) => result,
                        Err(_) => Err(IndexingError::Timeout(stage_id.clone())),
                    };
                    (stage_id, doc_ids, result)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((stage_id, _, Ok(stage_report))) => {
                    for (doc_id, reason) in &stage_report.failed {
                        warn!(stage = %stage_id, doc_id = %doc_id, reason = %reason, "Stage failed for document");
                        self.emit(PipelineEvent::StageFailed {
                            doc_id: doc_id.clone(),
                            stage: stage_id.clone(),
                            reason: reason.clone(),
                        });
                    }
                    report.record(&stage_id, stage_report);
                }
                Ok((stage_id, doc_ids, Err(e))) => {
                    warn!(stage = %stage_id, count = doc_ids.len(), error = %e, "Stage batch failed");
                    let mut failed = StageReport::new();
                    for doc_id in doc_ids {
                        self.emit(PipelineEvent::StageFailed {
                            doc_id: doc_id.clone(),
                            stage: stage_id.clone(),
                            reason: e.to_string(),
                        });
                        failed.record_failure(doc_id, &e);
                    }
                    report.record(&stage_id, failed);
                }
                Err(e) => warn!(error = %e, "Stage task aborted"),
            }
        }
        Ok(())
    }

    /// Emit purge signals for fully acknowledged tombstones and delete them
    /// when configured to.
    async fn purge_acknowledged(
        &self,
        candidates: &BTreeSet<DocId>,
    ) -> Result<Vec<DocId>, IndexingError> {
        let mut ready = Vec::new();
        for doc_id in candidates {
            if let Some(state) = self.get_state(doc_id)? {
                if state.removed && self.is_fully_processed(&state) {
                    ready.push(doc_id.clone());
                }
            }
        }
        if ready.is_empty() {
            return Ok(ready);
        }

        for doc_id in &ready {
            self.emit(PipelineEvent::ReadyForPurge(doc_id.clone()));
        }
        if self.inner.settings.purge_removed {
            let deleted = self.purge(&ready).await?;
            info!(count = deleted, "Purged removed documents");
        }
        Ok(ready)
    }

    /// Loop passes until cancelled, idling on queue notifications or the
    /// flush interval.
    pub async fn run(&self, ctx: &OpContext) -> Result<(), IndexingError> {
        self.initialize(ctx).await?;
        info!(parent: ctx.span(), stages = ?self.stage_ids(), "Pipeline worker started");
        let idle = Duration::from_millis(self.inner.settings.flush_interval_ms);

        while !ctx.is_cancelled() {
            let busy = match self.run_pass(ctx).await {
                Ok(report) if report.cancelled => break,
                Ok(report) => !report.is_idle(),
                Err(e) => {
                    warn!(parent: ctx.span(), error = %e, "Pass failed");
                    false
                }
            };
            if busy {
                continue;
            }

            tokio::select! {
                _ = ctx.cancel_token().cancelled() => break,
                _ = self.inner.queue.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        self.flush().await?;
        info!(parent: ctx.span(), "Pipeline worker stopped");
        Ok(())
    }

    /// Run passes until one finds no work, at most `max_passes` times.
    pub async fn run_until_idle(
        &self,
        ctx: &OpContext,
        max_passes: usize,
    ) -> Result<Vec<PassReport>, IndexingError> {
        let mut reports = Vec::new();
        for _ in 0..max_passes {
            let report = self.run_pass(ctx).await?;
            let done = report.is_idle() || report.cancelled;
            reports.push(report);
            if done {
                break;
            }
        }
        Ok(reports)
    }
}
