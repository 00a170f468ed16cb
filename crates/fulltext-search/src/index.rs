//! On-disk location and lifecycle of the full-text index.

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_fulltext_schema, SearchSchema};

const WRITER_BUDGET_MB: usize = 50;
const META_FILE: &str = "meta.json";

/// Where the index lives and how much heap its writer may use.
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub index_path: PathBuf,
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: WRITER_BUDGET_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    fn writer_budget_bytes(&self) -> usize {
        self.writer_memory_mb.saturating_mul(1 << 20)
    }
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self::new("./fts-index")
    }
}

/// A Tantivy index whose schema has been checked against the document
/// layout the backend writes.
pub struct SearchIndex {
    index: Index,
    schema: SearchSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Reuse the index at `config.index_path`, creating it when absent.
    ///
    /// Fails with [`SearchError::SchemaMismatch`] when an existing index
    /// lacks one of the document fields.
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = open_or_create_index(&config.index_path)?;
        let schema = SearchSchema::from_schema(index.schema())?;
        info!(path = ?config.index_path, "Full-text index opened");
        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &SearchSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Single writer for the backend. Tantivy locks the directory, so a
    /// second call while the first writer lives returns an error.
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let writer = self.index.writer(self.config.writer_budget_bytes())?;
        debug!(budget_mb = self.config.writer_memory_mb, "Index writer acquired");
        Ok(writer)
    }

    /// Reader with manual reload; the indexer reloads after each commit so
    /// writes are visible once `upsert`/`remove` resolve.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        Ok(self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }

    pub fn path(&self) -> &Path {
        &self.config.index_path
    }

    pub fn exists(&self) -> bool {
        has_index(&self.config.index_path)
    }
}

fn has_index(dir: &Path) -> bool {
    dir.join(META_FILE).is_file()
}

/// Open the index in `path`, or lay down a fresh one with the document
/// schema.
pub fn open_or_create_index(path: &Path) -> Result<Index, SearchError> {
    if has_index(path) {
        debug!(path = ?path, "Reusing full-text index");
        return Ok(Index::open_in_dir(path)?);
    }

    info!(path = ?path, "No index found, creating one");
    std::fs::create_dir_all(path)?;
    let layout = build_fulltext_schema();
    Ok(Index::create_in_dir(path, layout.schema().clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(dir.path().join("fts"));

        {
            let created = SearchIndex::open_or_create(config.clone()).unwrap();
            assert!(created.exists());
        }

        let reopened = SearchIndex::open_or_create(config).unwrap();
        assert!(reopened.exists());
        assert_eq!(reopened.path(), dir.path().join("fts"));
        assert!(reopened.schema().schema().get_field("summary").is_ok());
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let dir = TempDir::new().unwrap();
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(dir.path())).unwrap();

        let _writer = index.writer().unwrap();
        assert!(index.writer().is_err());
        assert!(index.reader().is_ok());
    }

    #[test]
    fn test_writer_budget() {
        let config = SearchIndexConfig::default().with_memory_mb(64);
        assert_eq!(config.writer_budget_bytes(), 64 * 1024 * 1024);
        assert_eq!(SearchIndexConfig::default().writer_memory_mb, WRITER_BUDGET_MB);
    }
}
