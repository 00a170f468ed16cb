//! Search request and result shapes shared by the backend and pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClassId, DocId};

/// Structured full-text query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text; empty matches every document in scope
    #[serde(default)]
    pub text: String,

    /// Restrict to one space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
}

impl SearchQuery {
    /// Query for free text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            space: None,
        }
    }

    /// Restrict to a space.
    pub fn in_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// True when the query has no free text.
    pub fn is_match_all(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A document as stored in (and returned from) the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDoc {
    /// Source document id
    pub id: DocId,

    /// Own class
    pub class: ClassId,

    /// Own class followed by every ancestor class
    #[serde(default)]
    pub classes: Vec<ClassId>,

    /// Space
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,

    /// Parent document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<DocId>,

    /// Indexed fields
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    /// Summary text when the summarization stage produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Relevance score (only meaningful in results)
    #[serde(default)]
    pub score: f32,
}

impl IndexedDoc {
    /// Create a document with no fields.
    pub fn new(id: impl Into<DocId>, class: impl Into<ClassId>) -> Self {
        let class = class.into();
        Self {
            id: id.into(),
            classes: vec![class.clone()],
            class,
            space: None,
            attached_to: None,
            fields: BTreeMap::new(),
            summary: None,
            score: 0.0,
        }
    }
}

/// Result of a search: matching documents plus the incompleteness flag.
///
/// `pass = true` means some documents in scope have not finished every
/// required stage, so the result may be missing matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    /// Matching documents, best first
    pub docs: Vec<IndexedDoc>,

    /// Result may be incomplete
    pub pass: bool,
}

impl SearchHits {
    /// Complete result.
    pub fn complete(docs: Vec<IndexedDoc>) -> Self {
        Self { docs, pass: false }
    }

    /// No answer from this source; the caller should consult another path.
    pub fn pass_through() -> Self {
        Self {
            docs: Vec::new(),
            pass: true,
        }
    }

    /// True when no documents matched.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_all() {
        assert!(SearchQuery::default().is_match_all());
        assert!(SearchQuery::text("   ").is_match_all());
        assert!(!SearchQuery::text("login").is_match_all());
    }

    #[test]
    fn test_indexed_doc_includes_own_class() {
        let doc = IndexedDoc::new("d1", "task");
        assert_eq!(doc.classes, vec!["task".to_string()]);
    }

    #[test]
    fn test_hits_constructors() {
        assert!(!SearchHits::complete(Vec::new()).pass);
        let passed = SearchHits::pass_through();
        assert!(passed.pass);
        assert!(passed.is_empty());
    }
}
