//! Search backend capability consumed by the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fulltext_types::{ClassId, IndexedDoc, SearchQuery};

use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::indexer::SearchIndexer;
use crate::searcher::FullTextSearcher;

/// Raw search backend: upsert, delete and class-scoped query.
///
/// Writes become visible to `search` once the call resolves.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Insert or replace documents by id.
    async fn upsert(&self, docs: Vec<IndexedDoc>) -> Result<usize, SearchError>;

    /// Delete documents by id. Unknown ids are ignored.
    async fn remove(&self, ids: &[String]) -> Result<usize, SearchError>;

    /// Query documents whose class set intersects `classes`.
    async fn search(
        &self,
        classes: &[ClassId],
        query: &SearchQuery,
        size: usize,
        from: usize,
    ) -> Result<Vec<IndexedDoc>, SearchError>;

    /// Number of indexed documents.
    async fn count(&self) -> Result<u64, SearchError>;
}

/// Tantivy-backed [`SearchBackend`].
///
/// Commits, reader reloads and queries run on the blocking pool so a slow
/// commit never parks an async worker, and the caller's timeout can still
/// fire while it is in flight.
pub struct TantivyBackend {
    index: SearchIndex,
    indexer: Arc<SearchIndexer>,
    searcher: Arc<FullTextSearcher>,
}

impl TantivyBackend {
    /// Open (or create) the index and its writer/reader.
    pub fn open(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = SearchIndex::open_or_create(config)?;
        let indexer = Arc::new(SearchIndexer::new(&index)?);
        let searcher = Arc::new(FullTextSearcher::new(&index)?);
        info!(path = ?index.path(), docs = searcher.num_docs(), "Search backend ready");
        Ok(Self {
            index,
            indexer,
            searcher,
        })
    }

    /// Underlying index.
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SearchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SearchError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SearchError::Task(e.to_string()))?
}

#[async_trait]
impl SearchBackend for TantivyBackend {
    async fn upsert(&self, docs: Vec<IndexedDoc>) -> Result<usize, SearchError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let indexer = self.indexer.clone();
        let searcher = self.searcher.clone();
        let count = blocking(move || {
            let count = indexer.upsert_docs(&docs)?;
            searcher.reload()?;
            Ok(count)
        })
        .await?;
        debug!(count, "Upserted into search backend");
        Ok(count)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize, SearchError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let indexer = self.indexer.clone();
        let searcher = self.searcher.clone();
        let ids = ids.to_vec();
        let count = blocking(move || {
            let count = indexer.delete_docs(&ids)?;
            searcher.reload()?;
            Ok(count)
        })
        .await?;
        debug!(count, "Removed from search backend");
        Ok(count)
    }

    async fn search(
        &self,
        classes: &[ClassId],
        query: &SearchQuery,
        size: usize,
        from: usize,
    ) -> Result<Vec<IndexedDoc>, SearchError> {
        let searcher = self.searcher.clone();
        let classes = classes.to_vec();
        let query = query.clone();
        blocking(move || searcher.search(&classes, &query, size, from)).await
    }

    async fn count(&self) -> Result<u64, SearchError> {
        Ok(self.searcher.num_docs())
    }
}
