//! Mapping between [`IndexedDoc`] and Tantivy documents.

use std::collections::BTreeMap;

use tantivy::schema::Value as _;
use tantivy::TantivyDocument;

use fulltext_types::{value_text, IndexedDoc};

use crate::error::SearchError;
use crate::schema::SearchSchema;

/// Searchable text of a document: every textual field value in key order.
pub fn searchable_text(doc: &IndexedDoc) -> String {
    doc.fields
        .values()
        .filter_map(value_text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert an [`IndexedDoc`] to a Tantivy document.
pub fn indexed_doc_to_doc(
    schema: &SearchSchema,
    doc: &IndexedDoc,
) -> Result<TantivyDocument, SearchError> {
    let mut out = TantivyDocument::default();
    out.add_text(schema.id, &doc.id);
    out.add_text(schema.own_class, &doc.class);

    let mut classes: Vec<&str> = doc.classes.iter().map(|c| c.as_str()).collect();
    if !classes.contains(&doc.class.as_str()) {
        classes.push(&doc.class);
    }
    for class in classes {
        out.add_text(schema.class, class);
    }

    if let Some(space) = &doc.space {
        out.add_text(schema.space, space);
    }
    if let Some(parent) = &doc.attached_to {
        out.add_text(schema.attached_to, parent);
    }
    out.add_text(schema.text, searchable_text(doc));
    if let Some(summary) = &doc.summary {
        out.add_text(schema.summary, summary);
    }
    out.add_text(schema.fields, serde_json::to_string(&doc.fields)?);
    Ok(out)
}

/// Rebuild an [`IndexedDoc`] from its stored fields.
///
/// `classes` only carries the own class; ancestors are not stored.
pub fn tantivy_doc_to_indexed(
    schema: &SearchSchema,
    doc: &TantivyDocument,
    score: f32,
) -> Result<IndexedDoc, SearchError> {
    let text = |field| {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let id = text(schema.id)
        .ok_or_else(|| SearchError::SchemaMismatch("stored document without id".into()))?;
    let class = text(schema.own_class).unwrap_or_default();
    let fields: BTreeMap<String, serde_json::Value> = match text(schema.fields) {
        Some(json) => serde_json::from_str(&json)?,
        None => BTreeMap::new(),
    };

    let mut indexed = IndexedDoc::new(id, class);
    indexed.space = text(schema.space);
    indexed.attached_to = text(schema.attached_to);
    indexed.summary = text(schema.summary);
    indexed.fields = fields;
    indexed.score = score;
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_fulltext_schema;
    use serde_json::json;
    use tantivy::schema::Value;

    fn sample() -> IndexedDoc {
        let mut doc = IndexedDoc::new("issue-1", "tracker:class:Issue");
        doc.classes.push("core:class:Doc".into());
        doc.space = Some("space-1".into());
        doc.fields.insert("attr.title".into(), json!("Login fails"));
        doc.fields.insert("attr.labels".into(), json!(["auth", "bug"]));
        doc.fields.insert("attr.meta".into(), json!({"x": 1}));
        doc.summary = Some("Login fails on Safari".into());
        doc
    }

    #[test]
    fn test_searchable_text_skips_objects() {
        let text = searchable_text(&sample());
        assert_eq!(text, "auth bug\nLogin fails");
    }

    #[test]
    fn test_stored_fields_survive() {
        let schema = build_fulltext_schema();
        let doc = indexed_doc_to_doc(&schema, &sample()).unwrap();
        let back = tantivy_doc_to_indexed(&schema, &doc, 1.5).unwrap();

        assert_eq!(back.id, "issue-1");
        assert_eq!(back.class, "tracker:class:Issue");
        assert_eq!(back.space.as_deref(), Some("space-1"));
        assert_eq!(back.summary.as_deref(), Some("Login fails on Safari"));
        assert_eq!(back.fields.get("attr.meta"), Some(&json!({"x": 1})));
        assert_eq!(back.score, 1.5);
    }

    #[test]
    fn test_class_values_include_ancestors() {
        let schema = build_fulltext_schema();
        let doc = indexed_doc_to_doc(&schema, &sample()).unwrap();
        let classes: Vec<&str> = doc
            .get_all(schema.class)
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(classes, vec!["tracker:class:Issue", "core:class:Doc"]);
    }
}
