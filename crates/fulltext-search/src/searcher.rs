//! Class-scoped search with BM25 scoring.

use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{IndexReader, TantivyDocument, Term};
use tracing::debug;

use fulltext_types::{ClassId, IndexedDoc, SearchQuery};

use crate::document::tantivy_doc_to_indexed;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

/// Searcher over the full-text index.
pub struct FullTextSearcher {
    reader: IndexReader,
    schema: SearchSchema,
    query_parser: QueryParser,
}

impl FullTextSearcher {
    /// Create a new searcher from a SearchIndex.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let reader = index.reader()?;
        let schema = index.schema().clone();
        let query_parser = QueryParser::for_index(index.index(), vec![schema.text, schema.summary]);

        Ok(Self {
            reader,
            schema,
            query_parser,
        })
    }

    /// Reload the reader to see recent commits.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        debug!("Reloaded search reader");
        Ok(())
    }

    fn term_query(&self, field: tantivy::schema::Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    /// Search documents whose class set intersects `classes`.
    ///
    /// An empty `classes` slice searches every class. An empty query text
    /// matches every document in scope.
    pub fn search(
        &self,
        classes: &[ClassId],
        query: &SearchQuery,
        size: usize,
        from: usize,
    ) -> Result<Vec<IndexedDoc>, SearchError> {
        // No page can hold more than the live doc count; clamping keeps
        // Tantivy's `limit + offset` from overflowing on "no limit" sizes.
        let live = usize::try_from(self.num_docs()).unwrap_or(usize::MAX);
        let limit = size.min(live);
        if limit == 0 || from >= live {
            return Ok(Vec::new());
        }

        let text_query: Box<dyn Query> = if query.is_match_all() {
            Box::new(AllQuery)
        } else {
            let (parsed, errors) = self.query_parser.parse_query_lenient(&query.text);
            if !errors.is_empty() {
                debug!(query = %query.text, errors = errors.len(), "Lenient query parse");
            }
            parsed
        };

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
        if !classes.is_empty() {
            let class_clauses = classes
                .iter()
                .map(|c| (Occur::Should, self.term_query(self.schema.class, c)))
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(class_clauses))));
        }
        if let Some(space) = &query.space {
            clauses.push((Occur::Must, self.term_query(self.schema.space, space)));
        }
        let final_query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(
            &final_query,
            &TopDocs::with_limit(limit).and_offset(from),
        )?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            results.push(tantivy_doc_to_indexed(&self.schema, &doc, score)?);
        }

        debug!(
            query = %query.text,
            classes = classes.len(),
            results = results.len(),
            "Full-text search complete"
        );
        Ok(results)
    }

    /// Get the number of indexed documents.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}
