//! Pipeline errors.
//!
//! `Config` is only raised while building; everything else can surface from
//! a pass, where per-document failures are recorded in the pass report and
//! retried instead of aborting the pass.

use fulltext_search::SearchError;
use fulltext_storage::StorageError;
use fulltext_types::FulltextError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("State store: {0}")]
    Storage(#[from] StorageError),

    #[error("Search backend: {0}")]
    Search(#[from] SearchError),

    #[error(transparent)]
    Types(#[from] FulltextError),

    #[error("Encoding: {0}")]
    Serialization(String),

    /// Invalid stage chain
    #[error("Invalid stage chain: {0}")]
    Config(String),

    /// No state exists for the document id
    #[error("No index state for {0}")]
    UnknownDocument(String),

    #[error("{stage} cannot complete {doc_id} before its requirements")]
    RequirementsNotMet { doc_id: String, stage: String },

    #[error("{stage}: {message}")]
    Stage { stage: String, message: String },

    #[error("{0} exceeded its time limit")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl IndexingError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = IndexingError::Config("duplicate stage cnt-v3".to_string());
        assert_eq!(err.to_string(), "Invalid stage chain: duplicate stage cnt-v3");

        let err = IndexingError::UnknownDocument("doc-9".to_string());
        assert_eq!(err.to_string(), "No index state for doc-9");

        let err = IndexingError::RequirementsNotMet {
            doc_id: "d".into(),
            stage: "fts-v17".into(),
        };
        assert_eq!(
            err.to_string(),
            "fts-v17 cannot complete d before its requirements"
        );

        assert_eq!(
            IndexingError::stage("sum-v5", "boom").to_string(),
            "sum-v5: boom"
        );
    }

    #[test]
    fn test_conversions() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        assert!(matches!(
            IndexingError::from(json_err),
            IndexingError::Serialization(_)
        ));

        let err: IndexingError = FulltextError::InvalidStageId("bad".into()).into();
        assert!(matches!(err, IndexingError::Types(_)));
    }
}
