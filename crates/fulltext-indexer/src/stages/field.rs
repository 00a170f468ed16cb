//! Field projection stage.
//!
//! Projects scalar attributes into `attr.<name>` fields plus the `space` and
//! `attachedTo` relations. Completing this stage invalidates every later
//! stage except collaborative content, since everything downstream is
//! derived from the projected fields.

use async_trait::async_trait;
use serde_json::Value;

use fulltext_types::{
    DocIndexState, DocUpdate, SourceDoc, COLLAB_STAGE_ID, CONTENT_STAGE_ID, FIELD_STAGE_ID,
};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;
use crate::stage::{Stage, StageDescriptor, StageReport};

/// Field prefix for projected attributes.
pub const ATTRIBUTE_FIELD_PREFIX: &str = "attr.";

/// Field holding the document's space.
pub const SPACE_FIELD: &str = "space";

/// Field holding the parent document id.
pub const ATTACHED_TO_FIELD: &str = "attachedTo";

/// Attribute projection.
pub struct FieldStage {
    descriptor: StageDescriptor,
}

impl FieldStage {
    /// Stage with the default identifier and prerequisites.
    pub fn new(enabled: bool) -> Result<Self, IndexingError> {
        Ok(Self {
            descriptor: StageDescriptor::parse(FIELD_STAGE_ID)?
                .requires(&[CONTENT_STAGE_ID])?
                .clears_except(&[CONTENT_STAGE_ID, COLLAB_STAGE_ID])?
                .enabled(enabled),
        })
    }

    fn project(&self, state: &DocIndexState, doc: Option<&SourceDoc>) -> DocUpdate {
        let mut update = DocUpdate::for_stage(self.descriptor.id());

        if let Some(doc) = doc {
            for (name, value) in &doc.attributes {
                if name.starts_with('_') || !is_projectable(value) {
                    continue;
                }
                update = update.set_field(format!("{ATTRIBUTE_FIELD_PREFIX}{name}"), value.clone());
            }
            update = match &doc.space {
                Some(space) => update.set_field(SPACE_FIELD, space.as_str()),
                None => update.unset_field(SPACE_FIELD),
            };
            update = match &doc.attached_to {
                Some(parent) => update.set_field(ATTACHED_TO_FIELD, parent.as_str()),
                None => update.unset_field(ATTACHED_TO_FIELD),
            };
        }

        let stale: Vec<String> = state
            .fields
            .keys()
            .filter(|k| {
                k.starts_with(ATTRIBUTE_FIELD_PREFIX) && !update.set_fields.contains_key(*k)
            })
            .cloned()
            .collect();
        for key in stale {
            update = update.unset_field(key);
        }
        update
    }
}

/// Strings, numbers, booleans and arrays of those.
fn is_projectable(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => true,
        Value::Array(items) => items
            .iter()
            .all(|v| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))),
        Value::Null | Value::Object(_) => false,
    }
}

#[async_trait]
impl Stage for FieldStage {
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

            let update = self.project(state, doc.as_ref());
            match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&state.doc_id, e),
            }
        }

        Ok(report)
    }
}
