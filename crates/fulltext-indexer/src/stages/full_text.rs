//! Full-text push stage.
//!
//! Assembles an [`IndexedDoc`] from the accumulated state fields and upserts
//! it into the search backend. Any later field change made by another stage
//! invalidates the push marker through the registered handler, so the
//! backend never lags behind the state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use fulltext_types::{
    ClassHierarchy, ClassId, DocIndexState, DocUpdate, IndexedDoc, SearchHits, SearchQuery,
    CONTENT_STAGE_ID, FIELD_STAGE_ID, FULL_TEXT_PUSH_STAGE_ID,
};

use crate::context::OpContext;
use crate::error::IndexingError;
use crate::pipeline::FullTextPipeline;
use crate::stage::{Stage, StageDescriptor, StageReport, UpdateFieldsHandler};

use super::summary::SUMMARY_FIELD;

/// Backend push.
pub struct FullTextPushStage {
    descriptor: StageDescriptor,
}

impl FullTextPushStage {
    /// Stage with the default identifier and prerequisites.
    pub fn new(enabled: bool) -> Result<Self, IndexingError> {
        Ok(Self {
            descriptor: StageDescriptor::parse(FULL_TEXT_PUSH_STAGE_ID)?
                .requires(&[CONTENT_STAGE_ID, FIELD_STAGE_ID])?
                .enabled(enabled),
        })
    }
}

/// True if `update` changes any field of `before` other than the summary.
pub(crate) fn changes_indexed_fields(before: &DocIndexState, update: &DocUpdate) -> bool {
    update
        .set_fields
        .iter()
        .any(|(k, v)| k != SUMMARY_FIELD && before.fields.get(k) != Some(v))
        || update
            .unset_fields
            .iter()
            .any(|k| k != SUMMARY_FIELD && before.fields.contains_key(k))
}

/// Handler clearing `stage_id` whenever another stage changes indexed fields.
pub(crate) fn invalidate_on_field_change(stage_id: String) -> UpdateFieldsHandler {
    Arc::new(move |before: &DocIndexState, update: &mut DocUpdate| {
        if update.stage.as_deref() == Some(stage_id.as_str()) {
            return;
        }
        if changes_indexed_fields(before, update) {
            update.clear_stages.insert(stage_id.clone());
        }
    })
}

/// Backend document for a state.
pub(crate) fn indexed_doc(state: &DocIndexState, hierarchy: &ClassHierarchy) -> IndexedDoc {
    let mut doc = IndexedDoc::new(state.doc_id.clone(), state.object_class.clone());
    doc.classes = hierarchy.ancestors(&state.object_class);
    doc.space = state.space.clone().or_else(|| {
        state
            .fields
            .get(super::field::SPACE_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    doc.attached_to = state.attached_to.clone();
    doc.summary = state
        .fields
        .get(SUMMARY_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);
    doc.fields = state
        .fields
        .iter()
        .filter(|(k, _)| k.as_str() != SUMMARY_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    doc
}

#[async_trait]
impl Stage for FullTextPushStage {
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

        let mut to_index = Vec::with_capacity(docs.len());
        let mut empty = Vec::new();
        for state in docs {
            let force = pipeline
                .find_context(&state.object_class)
                .is_some_and(|c| c.force_index);
            if state.text_fields().is_empty() && !force {
                empty.push(state.doc_id.clone());
            } else {
                to_index.push(indexed_doc(state, pipeline.hierarchy()));
            }
        }

        // Failing backend writes leave every marker untouched; the batch is
        // retried next pass.
        if let Err(e) = pipeline.backend().upsert(to_index).await {
            warn!(stage = %self.descriptor.id(), count = docs.len(), error = %e, "Backend upsert failed");
            for state in docs {
                report.record_failure(&state.doc_id, &e);
            }
            return Ok(report);
        }
        if !empty.is_empty() {
            debug!(count = empty.len(), "Dropping documents without text from the backend");
            if let Err(e) = pipeline.backend().remove(&empty).await {
                for state in docs {
                    report.record_failure(&state.doc_id, &e);
                }
                return Ok(report);
            }
        }

        for state in docs {
            let update = DocUpdate::for_stage(self.descriptor.id());
            match pipeline.update(ctx, &state.doc_id, true, update, false).await {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(&state.doc_id, e),
            }
        }
        Ok(report)
    }

    async fn remove(
        &self,
        docs: &[DocIndexState],
        pipeline: &FullTextPipeline,
        ctx: &OpContext,
    ) -> Result<StageReport, IndexingError> {
        let mut report = StageReport::new();
        let ids: Vec<String> = docs.iter().map(|d| d.doc_id.clone()).collect();

        if let Err(e) = pipeline.backend().remove(&ids).await {
            warn!(stage = %self.descriptor.id(), count = ids.len(), error = %e, "Backend delete failed");
            for id in &ids {
                report.record_failure(id, &e);
            }
            return Ok(report);
        }

        for id in &ids {
            match pipeline
                .acknowledge_removal(ctx, id, self.descriptor.id())
                .await
            {
                Ok(_) => report.record_success(),
                Err(e) => report.record_failure(id, e),
            }
        }
        Ok(report)
    }

    async fn search(
        &self,
        classes: &[ClassId],
        query: &SearchQuery,
        size: usize,
        from: usize,
        pipeline: &FullTextPipeline,
    ) -> Result<Option<SearchHits>, IndexingError> {
        let docs = pipeline.backend().search(classes, query, size, from).await?;
        Ok(Some(SearchHits::complete(docs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_indexed_doc_carries_ancestors_and_summary() {
        let hierarchy = ClassHierarchy::new()
            .with_class("doc", None)
            .with_class("task", Some("doc"));
        let mut state = DocIndexState::new("t1", "task").with_space("sp1");
        state.fields.insert("attr.title".into(), json!("Login bug"));
        state.fields.insert(SUMMARY_FIELD.into(), json!("short summary"));

        let doc = indexed_doc(&state, &hierarchy);
        assert_eq!(doc.classes, vec!["task".to_string(), "doc".to_string()]);
        assert_eq!(doc.space.as_deref(), Some("sp1"));
        assert_eq!(doc.summary.as_deref(), Some("short summary"));
        assert!(doc.fields.contains_key("attr.title"));
        assert!(!doc.fields.contains_key(SUMMARY_FIELD));
    }

    #[test]
    fn test_handler_ignores_own_and_summary_updates() {
        let handler = invalidate_on_field_change(FULL_TEXT_PUSH_STAGE_ID.to_string());
        let before = DocIndexState::new("d1", "task");

        let mut own = DocUpdate::for_stage(FULL_TEXT_PUSH_STAGE_ID).set_field("attr.x", 1);
        handler(&before, &mut own);
        assert!(own.clear_stages.is_empty());

        let mut summary = DocUpdate::for_stage("sum-v5").set_field(SUMMARY_FIELD, "s");
        handler(&before, &mut summary);
        assert!(summary.clear_stages.is_empty());

        let mut collab = DocUpdate::for_stage("collab-v1").set_field("collab.body", "text");
        handler(&before, &mut collab);
        assert!(collab.clear_stages.contains(FULL_TEXT_PUSH_STAGE_ID));
    }

    #[test]
    fn test_handler_ignores_unchanged_values() {
        let handler = invalidate_on_field_change(FULL_TEXT_PUSH_STAGE_ID.to_string());
        let mut before = DocIndexState::new("d1", "task");
        before.fields.insert("attr.x".into(), json!(1));

        let mut same = DocUpdate::for_stage("fld-v15").set_field("attr.x", 1);
        handler(&before, &mut same);
        assert!(same.clear_stages.is_empty());
    }
}
