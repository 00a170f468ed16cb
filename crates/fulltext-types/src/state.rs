//! Per-document indexing state.
//!
//! A [`DocIndexState`] records which stages have processed a document
//! (keyed by version-qualified stage identifier), the fields those stages
//! produced, and the tombstone flag. Stages never mutate it directly; they
//! describe changes with a [`DocUpdate`] that the pipeline applies under a
//! per-document lock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClassId, DocId};

/// Returns true when a stage marker counts as "complete".
///
/// `null` and `false` are negative; any other value (including opaque
/// payload objects) is positive.
pub fn is_positive_marker(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Persisted indexing progress of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocIndexState {
    /// Stable identifier of the source document
    pub doc_id: DocId,

    /// Class of the source document
    pub object_class: ClassId,

    /// Stage identifier -> completion marker
    #[serde(default)]
    pub stage_state: BTreeMap<String, Value>,

    /// Tombstone; never reset once set
    #[serde(default)]
    pub removed: bool,

    /// Accumulated stage outputs pushed into the search backend
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    /// Parent document for attached documents (comments, subtasks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<DocId>,

    /// Class of the parent document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to_class: Option<ClassId>,

    /// Space (workspace/project) the document lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,

    /// Last mutation time (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified_on: DateTime<Utc>,
}

impl DocIndexState {
    /// Create a fresh state with no completed stages.
    pub fn new(doc_id: impl Into<DocId>, object_class: impl Into<ClassId>) -> Self {
        Self {
            doc_id: doc_id.into(),
            object_class: object_class.into(),
            stage_state: BTreeMap::new(),
            removed: false,
            fields: BTreeMap::new(),
            attached_to: None,
            attached_to_class: None,
            space: None,
            modified_on: Utc::now(),
        }
    }

    /// Set the parent document.
    pub fn with_attached_to(mut self, parent: impl Into<DocId>, class: impl Into<ClassId>) -> Self {
        self.attached_to = Some(parent.into());
        self.attached_to_class = Some(class.into());
        self
    }

    /// Set the space.
    pub fn with_space(mut self, space: impl Into<String>) -> Self {
        self.space = Some(space.into());
        self
    }

    /// True if the exact identifier carries a positive marker.
    pub fn is_stage_complete(&self, stage_id: &str) -> bool {
        self.stage_state
            .get(stage_id)
            .map(is_positive_marker)
            .unwrap_or(false)
    }

    /// True if every identifier in `stage_ids` is complete.
    pub fn all_complete<'a>(&self, stage_ids: impl IntoIterator<Item = &'a str>) -> bool {
        stage_ids.into_iter().all(|id| self.is_stage_complete(id))
    }

    /// Record a positive marker for a stage.
    pub fn mark_stage(&mut self, stage_id: &str, payload: Option<Value>) {
        let marker = match payload {
            Some(v) if is_positive_marker(&v) => v,
            _ => Value::Bool(true),
        };
        self.stage_state.insert(stage_id.to_string(), marker);
    }

    /// Remove a stage marker. Returns true if a marker was present.
    pub fn clear_stage(&mut self, stage_id: &str) -> bool {
        self.stage_state.remove(stage_id).is_some()
    }

    /// Remove every marker.
    pub fn clear_all_stages(&mut self) {
        self.stage_state.clear();
    }

    /// Drop markers whose keys are not configured identifiers.
    ///
    /// Returns the stale keys that were removed.
    pub fn retain_stages(&mut self, configured: &BTreeSet<String>) -> Vec<String> {
        let stale: Vec<String> = self
            .stage_state
            .keys()
            .filter(|k| !configured.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            self.stage_state.remove(key);
        }
        stale
    }

    /// Identifiers currently marked complete.
    pub fn completed_stages(&self) -> Vec<&str> {
        self.stage_state
            .iter()
            .filter(|(_, v)| is_positive_marker(v))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Set the tombstone. Idempotent.
    pub fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// Textual field values, in key order, for indexing and summaries.
    pub fn text_fields(&self) -> Vec<(&str, String)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| value_text(v).map(|t| (k.as_str(), t)))
            .filter(|(_, t)| !t.trim().is_empty())
            .collect()
    }

    /// Touch the modification time.
    pub fn touch(&mut self) {
        self.modified_on = Utc::now();
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

/// Flatten a JSON value into searchable text.
///
/// Objects and nulls yield nothing; arrays join their scalar items.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        Value::Object(_) => None,
    }
}

/// A partial update to one document's state.
///
/// `stage` names the stage whose marker the update sets (mark = true) or
/// rolls back (mark = false). Field changes and explicit stage clears are
/// applied in the same atomic step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    /// Stage whose marker is set or cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Opaque marker payload used when marking complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Fields to set
    #[serde(default)]
    pub set_fields: BTreeMap<String, Value>,

    /// Fields to remove
    #[serde(default)]
    pub unset_fields: BTreeSet<String>,

    /// Additional stage markers to clear
    #[serde(default)]
    pub clear_stages: BTreeSet<String>,
}

impl DocUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying a stage marker.
    pub fn for_stage(stage_id: impl Into<String>) -> Self {
        Self {
            stage: Some(stage_id.into()),
            ..Default::default()
        }
    }

    /// Attach a marker payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set a field.
    pub fn set_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.unset_fields.remove(&key);
        self.set_fields.insert(key, value.into());
        self
    }

    /// Remove a field.
    pub fn unset_field(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.set_fields.remove(&key);
        self.unset_fields.insert(key);
        self
    }

    /// Clear another stage's marker.
    pub fn clear_stage(mut self, stage_id: impl Into<String>) -> Self {
        self.clear_stages.insert(stage_id.into());
        self
    }

    /// Field keys this update sets or unsets.
    pub fn touched_fields(&self) -> impl Iterator<Item = &str> {
        self.set_fields
            .keys()
            .chain(self.unset_fields.iter())
            .map(|k| k.as_str())
    }

    /// True if applying this update would change any field of `state`.
    pub fn changes_fields_of(&self, state: &DocIndexState) -> bool {
        self.set_fields
            .iter()
            .any(|(k, v)| state.fields.get(k) != Some(v))
            || self
                .unset_fields
                .iter()
                .any(|k| state.fields.contains_key(k))
    }

    /// Apply field changes. Returns true if anything changed.
    pub fn apply_fields(&self, state: &mut DocIndexState) -> bool {
        let mut changed = false;
        for (k, v) in &self.set_fields {
            if state.fields.get(k) != Some(v) {
                state.fields.insert(k.clone(), v.clone());
                changed = true;
            }
        }
        for k in &self.unset_fields {
            changed |= state.fields.remove(k).is_some();
        }
        changed
    }

    /// Merge another update into this one; later values win.
    pub fn merge(&mut self, other: DocUpdate) {
        if other.stage.is_some() {
            self.stage = other.stage;
            self.payload = other.payload;
        }
        for (k, v) in other.set_fields {
            self.unset_fields.remove(&k);
            self.set_fields.insert(k, v);
        }
        for k in other.unset_fields {
            self.set_fields.remove(&k);
            self.unset_fields.insert(k);
        }
        self.clear_stages.extend(other.clear_stages);
    }
}
