//! Collaborative content stage.
//!
//! Extracts plain text from ProseMirror-style markup stored per attribute
//! on the source document into `collab.<attr>` fields.

use async_trait::async_trait;

use fulltext_types::{DocIndexState, DocUpdate, SourceDoc, COLLAB_STAGE_ID, CONTENT_STAGE_ID};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;
use crate::stage::{Stage, StageDescriptor, StageReport};

use super::extract::collab_to_text;

/// Field prefix owned by this stage.
pub const COLLAB_FIELD_PREFIX: &str = "collab.";

/// Collaborative markup extraction.
pub struct CollabStage {
    descriptor: StageDescriptor,
}

impl CollabStage {
    /// Stage with the default identifier and prerequisites.
    pub fn new(enabled: bool) -> Result<Self, IndexingError> {
        Ok(Self {
            descriptor: StageDescriptor::parse(COLLAB_STAGE_ID)?
                .requires(&[CONTENT_STAGE_ID])?
                .enabled(enabled),
        })
    }

    fn extract(&self, state: &DocIndexState, doc: Option<&SourceDoc>) -> DocUpdate {
        let mut update = DocUpdate::for_stage(self.descriptor.id());

        if let Some(doc) = doc {
            for (attr, markup) in &doc.collab {
                let text = collab_to_text(markup);
                if !text.is_empty() {
                    update = update.set_field(format!("{COLLAB_FIELD_PREFIX}{attr}"), text);
                }
            }
        }

        let stale: Vec<String> = state
            .fields
            .keys()
            .filter(|k| k.starts_with(COLLAB_FIELD_PREFIX) && !update.set_fields.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            update = update.unset_field(key);
        }
        update
    }
}

#[async_trait]
impl Stage for CollabStage {
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

            let update = self.extract(state, doc.as_ref());
            match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&state.doc_id, e),
            }
        }

        Ok(report)
    }
}
