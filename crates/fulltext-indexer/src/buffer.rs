//! Write buffer for non-durable state updates.
//!
//! Buffered states shadow the store: every read in the pipeline checks the
//! buffer first. A flush writes all buffered states in one batched upsert.

use dashmap::DashMap;
use tracing::{debug, warn};

use fulltext_storage::{DocStateStore, StorageError};
use fulltext_types::{DocId, DocIndexState};

/// Buffered states awaiting persistence.
#[derive(Debug)]
pub struct WriteBuffer {
    pending: DashMap<DocId, DocIndexState>,
    limit: usize,
}

impl WriteBuffer {
    /// Buffer that asks for a flush once `limit` states are pending.
    pub fn new(limit: usize) -> Self {
        Self {
            pending: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Buffer a state, replacing any earlier version. Returns true when the
    /// buffer reached its limit.
    pub fn stage(&self, state: DocIndexState) -> bool {
        self.pending.insert(state.doc_id.clone(), state);
        self.pending.len() >= self.limit
    }

    /// Buffered version of a document, if any.
    pub fn get(&self, doc_id: &str) -> Option<DocIndexState> {
        self.pending.get(doc_id).map(|s| s.clone())
    }

    /// Drop a buffered state without persisting it.
    pub fn discard(&self, doc_id: &str) -> Option<DocIndexState> {
        self.pending.remove(doc_id).map(|(_, s)| s)
    }

    /// Snapshot of every buffered state.
    pub fn snapshot(&self) -> Vec<DocIndexState> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of buffered states.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Persist every buffered state in one batch.
    ///
    /// States stay readable in the buffer until the write succeeded; an
    /// entry replaced during the write is kept for the next flush.
    pub fn flush(&self, store: &dyn DocStateStore) -> Result<usize, StorageError> {
        let states = self.snapshot();
        if states.is_empty() {
            return Ok(0);
        }

        if let Err(e) = store.put_states(&states) {
            warn!(count = states.len(), error = %e, "Write buffer flush failed");
            return Err(e);
        }

        for state in &states {
            self.pending.remove_if(&state.doc_id, |_, current| current == state);
        }
        debug!(count = states.len(), "Flushed write buffer");
        Ok(states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_storage::Storage;
    use tempfile::TempDir;

    #[test]
    fn test_stage_reports_limit() {
        let buffer = WriteBuffer::new(2);
        assert!(!buffer.stage(DocIndexState::new("a", "task")));
        assert!(buffer.stage(DocIndexState::new("b", "task")));
        // Replacing does not grow the buffer
        assert!(buffer.stage(DocIndexState::new("b", "task")));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_flush_persists_and_empties() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        let buffer = WriteBuffer::new(10);

        let mut state = DocIndexState::new("a", "task");
        state.mark_stage("cnt-v3", None);
        buffer.stage(state);

        assert_eq!(buffer.get("a").map(|s| s.is_stage_complete("cnt-v3")), Some(true));
        assert_eq!(buffer.flush(&storage).unwrap(), 1);
        assert!(buffer.is_empty());
        assert!(storage
            .get_state("a")
            .unwrap()
            .unwrap()
            .is_stage_complete("cnt-v3"));
    }

    #[test]
    fn test_discard() {
        let buffer = WriteBuffer::new(10);
        buffer.stage(DocIndexState::new("a", "task"));
        assert!(buffer.discard("a").is_some());
        assert!(buffer.get("a").is_none());
    }
}
