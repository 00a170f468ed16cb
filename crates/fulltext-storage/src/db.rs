//! RocksDB-backed state store and document source.
//!
//! Index state and its class index entry are always written in one batch,
//! as are source documents and their attached-document entries.

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info};

use fulltext_types::{ClassId, DocIndexState, SourceDoc};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ATTACHED_INDEX, CF_CLASS_INDEX, CF_DOCUMENTS,
    CF_DOC_STATES,
};
use crate::error::StorageError;
use crate::keys::{AttachedKey, ClassIndexKey};
use crate::traits::{DocStateStore, DocumentSource};

/// State store plus document source over one RocksDB instance.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open (or create) the database and every column family.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&opts, path, build_cf_descriptors())?;
        info!(path = ?path, "State store opened");
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Keys in `cf_name` starting with `prefix`.
    fn prefix_keys(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut keys = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    // ===== Source documents =====

    /// Store a source document, maintaining the attached index.
    pub fn put_document(&self, doc: &SourceDoc) -> Result<(), StorageError> {
        let docs_cf = self.cf(CF_DOCUMENTS)?;
        let attached_cf = self.cf(CF_ATTACHED_INDEX)?;

        let mut batch = WriteBatch::default();

        if let Some(previous) = self.get_document(&doc.id)? {
            if previous.attached_to != doc.attached_to {
                if let Some(parent) = &previous.attached_to {
                    batch.delete_cf(attached_cf, AttachedKey::new(parent, &doc.id).to_bytes()?);
                }
            }
        }

        if let Some(parent) = &doc.attached_to {
            batch.put_cf(attached_cf, AttachedKey::new(parent, &doc.id).to_bytes()?, b"");
        }
        batch.put_cf(docs_cf, doc.id.as_bytes(), doc.to_bytes()?);

        self.db.write(batch)?;
        debug!(doc_id = %doc.id, class = %doc.class, "Stored source document");
        Ok(())
    }

    /// Delete a source document. Returns true if it existed.
    pub fn delete_document(&self, doc_id: &str) -> Result<bool, StorageError> {
        let Some(previous) = self.get_document(doc_id)? else {
            return Ok(false);
        };

        let docs_cf = self.cf(CF_DOCUMENTS)?;
        let attached_cf = self.cf(CF_ATTACHED_INDEX)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(docs_cf, doc_id.as_bytes());
        if let Some(parent) = &previous.attached_to {
            batch.delete_cf(attached_cf, AttachedKey::new(parent, doc_id).to_bytes()?);
        }
        self.db.write(batch)?;
        debug!(doc_id = %doc_id, "Deleted source document");
        Ok(true)
    }

    // ===== Admin =====

    /// Persist memtables of every column family.
    pub fn flush(&self) -> Result<(), StorageError> {
        ALL_CF_NAMES
            .iter()
            .try_for_each(|name| Ok(self.db.flush_cf(self.cf(name)?)?))
    }

    /// Record counts and on-disk size, for `status`.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            state_count: self.count_entries(CF_DOC_STATES)?,
            document_count: self.count_entries(CF_DOCUMENTS)?,
            disk_usage_bytes: dir_size(self.db.path()),
        })
    }

    fn count_entries(&self, cf_name: &str) -> Result<u64, StorageError> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .try_fold(0u64, |n, item| item.map(|_| n + 1).map_err(StorageError::from))
    }
}

impl DocStateStore for Storage {
    fn get_state(&self, doc_id: &str) -> Result<Option<DocIndexState>, StorageError> {
        let cf = self.cf(CF_DOC_STATES)?;
        match self.db.get_cf(cf, doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(DocIndexState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_states(&self, states: &[DocIndexState]) -> Result<(), StorageError> {
        if states.is_empty() {
            return Ok(());
        }
        let states_cf = self.cf(CF_DOC_STATES)?;
        let class_cf = self.cf(CF_CLASS_INDEX)?;

        let mut batch = WriteBatch::default();
        for state in states {
            if let Some(previous) = self.get_state(&state.doc_id)? {
                if previous.object_class != state.object_class {
                    batch.delete_cf(
                        class_cf,
                        ClassIndexKey::new(&previous.object_class, &state.doc_id).to_bytes()?,
                    );
                }
            }
            batch.put_cf(
                class_cf,
                ClassIndexKey::new(&state.object_class, &state.doc_id).to_bytes()?,
                b"",
            );
            batch.put_cf(states_cf, state.doc_id.as_bytes(), state.to_bytes()?);
        }

        self.db.write(batch)?;
        debug!(count = states.len(), "Persisted index states");
        Ok(())
    }

    fn delete_states(&self, doc_ids: &[String]) -> Result<usize, StorageError> {
        let states_cf = self.cf(CF_DOC_STATES)?;
        let class_cf = self.cf(CF_CLASS_INDEX)?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for doc_id in doc_ids {
            if let Some(previous) = self.get_state(doc_id)? {
                batch.delete_cf(
                    class_cf,
                    ClassIndexKey::new(&previous.object_class, doc_id).to_bytes()?,
                );
                batch.delete_cf(states_cf, doc_id.as_bytes());
                count += 1;
            }
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(count, "Deleted index states");
        }
        Ok(count)
    }

    fn states_for_classes(&self, classes: &[ClassId]) -> Result<Vec<DocIndexState>, StorageError> {
        let mut states = Vec::new();
        for class in classes {
            for key in self.prefix_keys(CF_CLASS_INDEX, &ClassIndexKey::prefix(class))? {
                let key = ClassIndexKey::from_bytes(&key)?;
                if let Some(state) = self.get_state(&key.doc_id)? {
                    states.push(state);
                }
            }
        }
        Ok(states)
    }

    fn scan_states(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DocIndexState>, StorageError> {
        let cf = self.cf(CF_DOC_STATES)?;
        let mode = match after {
            Some(start) => IteratorMode::From(start.as_bytes(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut states = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            if states.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if after.is_some_and(|a| key.as_ref() == a.as_bytes()) {
                continue;
            }
            states.push(DocIndexState::from_bytes(&value)?);
        }
        Ok(states)
    }
}

impl DocumentSource for Storage {
    fn get_document(&self, doc_id: &str) -> Result<Option<SourceDoc>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, doc_id.as_bytes())? {
            Some(bytes) => Ok(Some(SourceDoc::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn attached_documents(&self, parent: &str) -> Result<Vec<SourceDoc>, StorageError> {
        let mut docs = Vec::new();
        for key in self.prefix_keys(CF_ATTACHED_INDEX, &AttachedKey::prefix(parent))? {
            let key = AttachedKey::from_bytes(&key)?;
            if let Some(doc) = self.get_document(&key.child)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

/// Top-level files only; RocksDB keeps its SSTs flat in the db dir.
fn dir_size(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct StorageStats {
    pub state_count: u64,
    pub document_count: u64,
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = temp_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(
                storage.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_state_roundtrip() {
        let (storage, _temp) = temp_storage();

        let mut state = DocIndexState::new("doc-1", "task");
        state.mark_stage("cnt-v3", Some(json!({"blobs": 1})));
        storage.put_states(&[state.clone()]).unwrap();

        let loaded = storage.get_state("doc-1").unwrap().unwrap();
        assert_eq!(loaded.stage_state, state.stage_state);
        assert!(storage.get_state("missing").unwrap().is_none());
    }

    #[test]
    fn test_states_for_classes() {
        let (storage, _temp) = temp_storage();
        storage
            .put_states(&[
                DocIndexState::new("t1", "task"),
                DocIndexState::new("t2", "task"),
                DocIndexState::new("c1", "comment"),
            ])
            .unwrap();

        let tasks = storage.states_for_classes(&["task".to_string()]).unwrap();
        assert_eq!(tasks.len(), 2);

        let both = storage
            .states_for_classes(&["task".to_string(), "comment".to_string()])
            .unwrap();
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn test_class_change_moves_index_entry() {
        let (storage, _temp) = temp_storage();
        storage.put_states(&[DocIndexState::new("d1", "task")]).unwrap();
        storage
            .put_states(&[DocIndexState::new("d1", "subtask")])
            .unwrap();

        assert!(storage
            .states_for_classes(&["task".to_string()])
            .unwrap()
            .is_empty());
        assert_eq!(
            storage
                .states_for_classes(&["subtask".to_string()])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_delete_states() {
        let (storage, _temp) = temp_storage();
        storage
            .put_states(&[DocIndexState::new("a", "task"), DocIndexState::new("b", "task")])
            .unwrap();

        let deleted = storage
            .delete_states(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(storage.get_state("a").unwrap().is_none());
        assert_eq!(
            storage.states_for_classes(&["task".to_string()]).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_scan_states_pages() {
        let (storage, _temp) = temp_storage();
        let states: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| DocIndexState::new(*id, "task"))
            .collect();
        storage.put_states(&states).unwrap();

        let first = storage.scan_states(None, 2).unwrap();
        let ids: Vec<_> = first.iter().map(|s| s.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let second = storage.scan_states(Some("b"), 10).unwrap();
        let ids: Vec<_> = second.iter().map(|s| s.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn test_documents_and_attached_index() {
        let (storage, _temp) = temp_storage();
        storage.put_document(&SourceDoc::new("task-1", "task")).unwrap();
        storage
            .put_document(&SourceDoc::new("c1", "comment").attached("task-1", "task"))
            .unwrap();
        storage
            .put_document(&SourceDoc::new("c2", "comment").attached("task-1", "task"))
            .unwrap();

        let children = storage.attached_documents("task-1").unwrap();
        assert_eq!(children.len(), 2);

        // Re-attaching moves the index entry
        storage
            .put_document(&SourceDoc::new("c2", "comment").attached("task-2", "task"))
            .unwrap();
        assert_eq!(storage.attached_documents("task-1").unwrap().len(), 1);

        assert!(storage.delete_document("c1").unwrap());
        assert!(!storage.delete_document("c1").unwrap());
        assert!(storage.attached_documents("task-1").unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let (storage, _temp) = temp_storage();
        storage.put_document(&SourceDoc::new("d1", "task")).unwrap();
        storage.put_states(&[DocIndexState::new("d1", "task")]).unwrap();

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.state_count, 1);
        assert_eq!(stats.document_count, 1);
    }
}
