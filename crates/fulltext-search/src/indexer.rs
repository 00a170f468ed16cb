//! Write side of the full-text index.
//!
//! Each call stages its changes and commits them under one writer lock, so
//! a batch is either fully applied or rolled back.

use std::sync::{Mutex, MutexGuard};

use tantivy::{IndexWriter, Term};
use tracing::{debug, warn};

use fulltext_types::IndexedDoc;

use crate::document::indexed_doc_to_doc;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

pub struct SearchIndexer {
    writer: Mutex<IndexWriter>,
    schema: SearchSchema,
}

impl SearchIndexer {
    /// Takes the index's single writer.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        Ok(Self {
            writer: Mutex::new(index.writer()?),
            schema: index.schema().clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.schema.id, id)
    }

    /// Replace each document by id and commit. Returns the number written.
    pub fn upsert_docs(&self, docs: &[IndexedDoc]) -> Result<usize, SearchError> {
        let mut writer = self.lock()?;
        let staged = docs.iter().try_for_each(|doc| {
            let encoded = indexed_doc_to_doc(&self.schema, doc)?;
            writer.delete_term(self.id_term(&doc.id));
            writer.add_document(encoded)?;
            Ok::<_, SearchError>(())
        });

        if let Err(e) = staged {
            let opstamp = writer.rollback()?;
            warn!(opstamp, error = %e, "Discarded partially staged upsert");
            return Err(e);
        }

        let opstamp = writer.commit()?;
        debug!(opstamp, docs = docs.len(), "Upsert committed");
        Ok(docs.len())
    }

    /// Delete documents by id and commit. Unknown ids are no-ops.
    pub fn delete_docs(&self, ids: &[String]) -> Result<usize, SearchError> {
        let mut writer = self.lock()?;
        for id in ids {
            writer.delete_term(self.id_term(id));
        }
        let opstamp = writer.commit()?;
        debug!(opstamp, ids = ids.len(), "Delete committed");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SearchIndexConfig;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (SearchIndex, SearchIndexer) {
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(dir.path())).unwrap();
        let indexer = SearchIndexer::new(&index).unwrap();
        (index, indexer)
    }

    fn live_docs(index: &SearchIndex) -> u64 {
        let reader = index.reader().unwrap();
        reader.reload().unwrap();
        reader.searcher().num_docs()
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let dir = TempDir::new().unwrap();
        let (index, indexer) = open(&dir);

        let docs = vec![IndexedDoc::new("a", "task"), IndexedDoc::new("b", "task")];
        assert_eq!(indexer.upsert_docs(&docs).unwrap(), 2);
        indexer.upsert_docs(&docs[..1]).unwrap();

        assert_eq!(live_docs(&index), 2);
    }

    #[test]
    fn test_delete_ignores_unknown_ids() {
        let dir = TempDir::new().unwrap();
        let (index, indexer) = open(&dir);

        indexer
            .upsert_docs(&[IndexedDoc::new("a", "task"), IndexedDoc::new("b", "task")])
            .unwrap();
        indexer
            .delete_docs(&["a".to_string(), "missing".to_string()])
            .unwrap();

        assert_eq!(live_docs(&index), 1);
    }
}
