//! Update queue: coalesces change notifications until the next pass.
//!
//! Notifications for the same document merge into one [`QueuedChange`]
//! (`create` wins over a plain update, `removed` overrides both). The
//! queue is safe to feed while a pass is draining it; a notification that
//! arrives mid-drain lands in the next drain.

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::trace;

use fulltext_types::{DocId, QueuedChange};

/// Pending changes keyed by document id.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: DashMap<DocId, QueuedChange>,
    notify: Notify,
}

impl UpdateQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or merge a change.
    pub fn push(&self, doc_id: impl Into<DocId>, change: QueuedChange) {
        let doc_id = doc_id.into();
        trace!(doc_id = %doc_id, kind = %change.kind(), "Queued change");
        self.pending
            .entry(doc_id)
            .and_modify(|existing| existing.merge(change.clone()))
            .or_insert(change);
        self.notify.notify_one();
    }

    /// Add or merge several changes.
    pub fn extend(&self, changes: impl IntoIterator<Item = (DocId, QueuedChange)>) {
        for (doc_id, change) in changes {
            self.push(doc_id, change);
        }
    }

    /// Remove up to `limit` changes, ordered by document id.
    pub fn drain(&self, limit: usize) -> Vec<(DocId, QueuedChange)> {
        let mut keys: Vec<DocId> = self.pending.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.truncate(limit);

        keys.into_iter()
            .filter_map(|k| self.pending.remove(&k))
            .collect()
    }

    /// Number of documents with pending changes.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Resolves after the next `push`, or immediately if one happened since
    /// the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
