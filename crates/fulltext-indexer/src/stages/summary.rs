//! Summarization stage.
//!
//! For classes whose context asks for a full-text summary, concatenates the
//! document's text fields (and those of attached children when allowed),
//! stores the result in the `summary` field and re-upserts the document.

use async_trait::async_trait;
use tracing::{debug, warn};

use fulltext_types::{
    DocIndexState, DocUpdate, CONTENT_STAGE_ID, FIELD_STAGE_ID, FULL_TEXT_PUSH_STAGE_ID,
    SUMMARY_STAGE_ID,
};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;
use crate::stage::{Stage, StageDescriptor, StageReport, UpdateFieldsHandler};

use super::full_text::{indexed_doc, invalidate_on_field_change};

/// Field holding the summary text.
pub const SUMMARY_FIELD: &str = "summary";

/// Summary builder.
pub struct SummaryStage {
    descriptor: StageDescriptor,
    limit: usize,
}

impl SummaryStage {
    /// Stage with the default identifier, truncating summaries to `limit`
    /// characters.
    pub fn new(enabled: bool, limit: usize) -> Result<Self, IndexingError> {
        Ok(Self {
            descriptor: StageDescriptor::parse(SUMMARY_STAGE_ID)?
                .requires(&[CONTENT_STAGE_ID, FIELD_STAGE_ID, FULL_TEXT_PUSH_STAGE_ID])?
                .enabled(enabled),
            limit,
        })
    }

    async fn summarize(
        &self,
        state: &DocIndexState,
        pipeline: &FullTextPipeline,
        with_children: bool,
    ) -> Result<String, IndexingError> {
        let mut parts: Vec<String> = state
            .text_fields()
            .into_iter()
            .filter(|(k, _)| *k != SUMMARY_FIELD)
            .map(|(_, t)| t)
            .collect();

        if with_children {
            for child in pipeline.source().attached_documents(&state.doc_id)? {
                let Some(child_state) = pipeline.get_state(&child.id)? else {
                    continue;
                };
                if child_state.removed {
                    continue;
                }
                parts.extend(
                    child_state
                        .text_fields()
                        .into_iter()
                        .filter(|(k, _)| *k != SUMMARY_FIELD)
                        .map(|(_, t)| t),
                );
            }
        }

        Ok(truncate_chars(&parts.join("\n"), self.limit))
    }
}

/// First `limit` characters of `text`.
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl Stage for SummaryStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn update_fields_handler(&self) -> Option<UpdateFieldsHandler> {
        Some(invalidate_on_field_change(self.descriptor.id().to_string()))
    }

    async fn collect(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        let mut report = StageReport::new();

        for state in docs {
            let context = pipeline.find_context(&state.object_class).cloned();
            let Some(context) = context.filter(|c| c.full_text_summary) else {
                let update = DocUpdate::for_stage(self.descriptor.id());
                match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                    Ok(_) => report.record_success(),
                    Err(e) => report.record_failure(&state.doc_id, e),
                }
                continue;
            };

            let summary = match self
                .summarize(state, pipeline, context.child_processing_allowed)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    report.record_failure(&state.doc_id, e);
                    continue;
                }
            };

            let mut indexed = indexed_doc(state, pipeline.hierarchy());
            indexed.summary = Some(summary.clone());
            if let Err(e) = pipeline.backend().upsert(vec![indexed]).await {
                warn!(doc_id = %state.doc_id, error = %e, "Summary upsert failed");
                report.record_failure(&state.doc_id, e);
                continue;
            }

            debug!(doc_id = %state.doc_id, chars = summary.chars().count(), "Summary built");
            let update = DocUpdate::for_stage(self.descriptor.id()).set_field(SUMMARY_FIELD, summary);
            match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&state.doc_id, e),
            }
        }

        Ok(report)
    }
}
