//! Tantivy schema definition for indexed documents.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct SearchSchema {
    schema: Schema,
    /// Primary key (STRING | STORED)
    pub id: Field,
    /// Own class (STRING | STORED)
    pub own_class: Field,
    /// Own class and every ancestor, multi-valued (STRING)
    pub class: Field,
    /// Space (STRING | STORED)
    pub space: Field,
    /// Parent document (STRING | STORED)
    pub attached_to: Field,
    /// Searchable text assembled from fields (TEXT)
    pub text: Field,
    /// Summary (TEXT | STORED)
    pub summary: Field,
    /// Field map as JSON (STORED)
    pub fields: Field,
}

impl SearchSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SearchSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };

        Ok(Self {
            id: field("id")?,
            own_class: field("own_class")?,
            class: field("class")?,
            space: field("space")?,
            attached_to: field("attached_to")?,
            text: field("text")?,
            summary: field("summary")?,
            fields: field("fields")?,
            schema,
        })
    }
}

/// Build the full-text schema.
pub fn build_fulltext_schema() -> SearchSchema {
    let mut schema_builder = Schema::builder();

    let id = schema_builder.add_text_field("id", STRING | STORED);
    let own_class = schema_builder.add_text_field("own_class", STRING | STORED);
    let class = schema_builder.add_text_field("class", STRING);
    let space = schema_builder.add_text_field("space", STRING | STORED);
    let attached_to = schema_builder.add_text_field("attached_to", STRING | STORED);
    let text = schema_builder.add_text_field("text", TEXT);
    let summary = schema_builder.add_text_field("summary", TEXT | STORED);
    let fields = schema_builder.add_text_field("fields", STORED);

    let schema = schema_builder.build();

    SearchSchema {
        schema,
        id,
        own_class,
        class,
        space,
        attached_to,
        text,
        summary,
        fields,
    }
}
