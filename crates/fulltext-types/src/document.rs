//! Source documents as supplied by the document collaborator.
//!
//! The pipeline never owns these; stages read them to derive fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::DocIndexState;
use crate::{ClassId, DocId};

/// A content blob attached to a document (file body, description, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlob {
    /// Blob name, used as the field suffix (`content.<name>`)
    pub name: String,

    /// MIME type, e.g. `text/plain`, `text/html`, `text/markdown`
    #[serde(default = "default_mime")]
    pub mime: String,

    /// Raw blob body
    pub data: String,
}

fn default_mime() -> String {
    "text/plain".to_string()
}

impl ContentBlob {
    /// Create a blob.
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }
}

/// A raw document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
    /// Unique identifier
    pub id: DocId,

    /// Document class
    pub class: ClassId,

    /// Space (workspace/project)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,

    /// Parent document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<DocId>,

    /// Class of the parent document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to_class: Option<ClassId>,

    /// Plain attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Content blobs
    #[serde(default)]
    pub content: Vec<ContentBlob>,

    /// Collaborative markup per attribute (ProseMirror-style JSON)
    #[serde(default)]
    pub collab: BTreeMap<String, Value>,

    /// Last modification time
    #[serde(default = "Utc::now", with = "chrono::serde::ts_milliseconds")]
    pub modified_on: DateTime<Utc>,
}

impl SourceDoc {
    /// Create an empty document.
    pub fn new(id: impl Into<DocId>, class: impl Into<ClassId>) -> Self {
        Self {
            id: id.into(),
            class: class.into(),
            space: None,
            attached_to: None,
            attached_to_class: None,
            attributes: BTreeMap::new(),
            content: Vec::new(),
            collab: BTreeMap::new(),
            modified_on: Utc::now(),
        }
    }

    /// Set the space.
    pub fn in_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// Attach to a parent document.
    pub fn attached(mut self, parent: impl Into<DocId>, class: impl Into<ClassId>) -> Self {
        self.attached_to = Some(parent.into());
        self.attached_to_class = Some(class.into());
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Add a content blob.
    pub fn with_content(mut self, blob: ContentBlob) -> Self {
        self.content.push(blob);
        self
    }

    /// Set collaborative markup for an attribute.
    pub fn with_collab(mut self, attribute: impl Into<String>, markup: Value) -> Self {
        self.collab.insert(attribute.into(), markup);
        self
    }

    /// Initial index state for this document.
    pub fn initial_state(&self) -> DocIndexState {
        let mut state = DocIndexState::new(self.id.clone(), self.class.clone());
        state.attached_to = self.attached_to.clone();
        state.attached_to_class = self.attached_to_class.clone();
        state.space = self.space.clone();
        state
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
