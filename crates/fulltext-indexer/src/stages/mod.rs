//! Built-in stages.
//!
//! The default chain runs in declaration order:
//! content (`cnt-v3`) → fields (`fld-v15`) → full-text push (`fts-v17`)
//! → summary (`sum-v5`) → collaborative content (`collab-v1`).

pub mod collab;
pub mod content;
pub mod extract;
pub mod field;
pub mod full_text;
pub mod summary;

use std::sync::Arc;

use fulltext_types::{PipelineSettings, StageSettings};

use crate::error::IndexingError;
use crate::stage::Stage;

pub use collab::CollabStage;
pub use content::ContentStage;
pub use field::FieldStage;
pub use full_text::FullTextPushStage;
pub use summary::SummaryStage;

/// The default stage chain, with enable flags taken from settings.
pub fn default_stages(
    stages: &StageSettings,
    pipeline: &PipelineSettings,
) -> Result<Vec<Arc<dyn Stage>>, IndexingError> {
    Ok(vec![
        Arc::new(ContentStage::new(stages.content)?),
        Arc::new(FieldStage::new(stages.field)?),
        Arc::new(FullTextPushStage::new(stages.full_text_push)?),
        Arc::new(SummaryStage::new(stages.summary, pipeline.summary_limit)?),
        Arc::new(CollabStage::new(stages.collab)?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_types::{
        COLLAB_STAGE_ID, CONTENT_STAGE_ID, FIELD_STAGE_ID, FULL_TEXT_PUSH_STAGE_ID,
        SUMMARY_STAGE_ID,
    };

    #[test]
    fn test_default_chain_order() {
        let stages = default_stages(&StageSettings::default(), &PipelineSettings::default()).unwrap();
        let ids: Vec<&str> = stages.iter().map(|s| s.descriptor().id()).collect();
        assert_eq!(
            ids,
            vec![
                CONTENT_STAGE_ID,
                FIELD_STAGE_ID,
                FULL_TEXT_PUSH_STAGE_ID,
                SUMMARY_STAGE_ID,
                COLLAB_STAGE_ID
            ]
        );
    }

    #[test]
    fn test_enable_flags_applied() {
        let settings = StageSettings {
            summary: false,
            ..Default::default()
        };
        let stages = default_stages(&settings, &PipelineSettings::default()).unwrap();
        let disabled: Vec<&str> = stages
            .iter()
            .filter(|s| !s.descriptor().enabled)
            .map(|s| s.descriptor().id())
            .collect();
        assert_eq!(disabled, vec![SUMMARY_STAGE_ID]);
    }
}
