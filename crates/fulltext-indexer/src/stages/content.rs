//! Content extraction stage.
//!
//! Converts every content blob of the source document to plain text and
//! stores it under `content.<blob name>`.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use fulltext_types::{DocIndexState, DocUpdate, SourceDoc, CONTENT_STAGE_ID};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;
use crate::stage::{Stage, StageDescriptor, StageReport};

use super::extract::blob_to_text;

/// Field prefix owned by this stage.
pub const CONTENT_FIELD_PREFIX: &str = "content.";

/// Blob-to-text extraction.
pub struct ContentStage {
    descriptor: StageDescriptor,
}

impl ContentStage {
    /// Stage with the default identifier.
    pub fn new(enabled: bool) -> Result<Self, IndexingError> {
        Ok(Self {
            descriptor: StageDescriptor::parse(CONTENT_STAGE_ID)?.enabled(enabled),
        })
    }

    /// Build the update for one document.
    fn extract(&self, state: &DocIndexState, doc: Option<&SourceDoc>) -> DocUpdate {
        let mut update = DocUpdate::for_stage(self.descriptor.id());
        let mut extracted = 0usize;

        if let Some(doc) = doc {
            for blob in &doc.content {
                match blob_to_text(&blob.mime, &blob.data) {
                    Some(text) => {
                        update = update.set_field(format!("{CONTENT_FIELD_PREFIX}{}", blob.name), text);
                        extracted += 1;
                    }
                    None => debug!(
                        doc_id = %state.doc_id,
                        blob = %blob.name,
                        mime = %blob.mime,
                        "Skipping blob with unsupported mime type"
                    ),
                }
            }
        }

        let stale: Vec<String> = state
            .fields
            .keys()
            .filter(|k| k.starts_with(CONTENT_FIELD_PREFIX) && !update.set_fields.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            update = update.unset_field(key);
        }

        update.with_payload(json!({ "blobs": extracted }))
    }
}

#[async_trait]
impl Stage for ContentStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn collect(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        let mut report = StageReport::new();

        for state in docs {
            let doc = match pipeline.source().get_document(&state.doc_id) {
                Ok(doc) => doc,
                Err(e) => {
                    report.record_failure(&state.doc_id, e);
                    continue;
                }
            };
            if doc.is_none() {
                debug!(doc_id = %state.doc_id, "Source document gone, completing without content");
            }

            let update = self.extract(state, doc.as_ref());
            match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&state.doc_id, e),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_types::ContentBlob;
    use serde_json::json;

    #[test]
    fn test_extract_sets_and_unsets_content_fields() {
        let stage = ContentStage::new(true).unwrap();
        let mut state = DocIndexState::new("d1", "task");
        state.fields.insert("content.old".into(), json!("gone"));
        state.fields.insert("attr.title".into(), json!("kept"));

        let doc = SourceDoc::new("d1", "task")
            .with_content(ContentBlob::new("body", "text/html", "<p>Hello</p>"))
            .with_content(ContentBlob::new("image", "image/png", "\u{89}PNG"));

        let update = stage.extract(&state, Some(&doc));
        assert_eq!(update.stage.as_deref(), Some(CONTENT_STAGE_ID));
        assert_eq!(update.set_fields.get("content.body"), Some(&json!("Hello")));
        assert!(!update.set_fields.contains_key("content.image"));
        assert!(update.unset_fields.contains("content.old"));
        assert!(!update.unset_fields.contains("attr.title"));
        assert_eq!(update.payload, Some(json!({"blobs": 1})));
    }

    #[test]
    fn test_missing_source_clears_content() {
        let stage = ContentStage::new(true).unwrap();
        let mut state = DocIndexState::new("d1", "task");
        state.fields.insert("content.body".into(), json!("old"));

        let update = stage.extract(&state, None);
        assert!(update.set_fields.is_empty());
        assert!(update.unset_fields.contains("content.body"));
    }
}
