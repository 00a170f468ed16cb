//! Version-qualified stage identifiers.
//!
//! A stage identifier has the form `<name>-v<version>`, e.g. `cnt-v3`.
//! Completion markers in [`crate::DocIndexState`] are keyed by the full
//! identifier, so bumping the version suffix invalidates every marker the
//! previous version left behind.

use serde::{Deserialize, Serialize};

use crate::error::FulltextError;

/// Content extraction stage.
pub const CONTENT_STAGE_ID: &str = "cnt-v3";

/// Field projection stage.
pub const FIELD_STAGE_ID: &str = "fld-v15";

/// Full-text push stage.
pub const FULL_TEXT_PUSH_STAGE_ID: &str = "fts-v17";

/// Summarization stage.
pub const SUMMARY_STAGE_ID: &str = "sum-v5";

/// Collaborative content stage.
pub const COLLAB_STAGE_ID: &str = "collab-v1";

/// Prefix shared by every version of the full-text push stage.
pub const FULL_TEXT_PUSH_STAGE_PREFIX: &str = "fts-";

/// A parsed `<name>-v<version>` stage identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId {
    raw: String,
    name_len: usize,
    version: u32,
}

impl StageId {
    /// Parse an identifier, rejecting anything not shaped `<name>-v<digits>`.
    pub fn parse(raw: &str) -> Result<Self, FulltextError> {
        let (name, version) = raw
            .rsplit_once("-v")
            .ok_or_else(|| FulltextError::InvalidStageId(raw.to_string()))?;

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(FulltextError::InvalidStageId(raw.to_string()));
        }

        if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
            return Err(FulltextError::InvalidStageId(raw.to_string()));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| FulltextError::InvalidStageId(raw.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            name_len: name.len(),
            version,
        })
    }

    /// Build an identifier from its parts.
    pub fn new(name: &str, version: u32) -> Result<Self, FulltextError> {
        Self::parse(&format!("{}-v{}", name, version))
    }

    /// Full identifier string (the marker key).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Logical stage name without the version suffix.
    pub fn name(&self) -> &str {
        &self.raw[..self.name_len]
    }

    /// Version number.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Same logical stage with a different version.
    pub fn with_version(&self, version: u32) -> Self {
        Self {
            raw: format!("{}-v{}", self.name(), version),
            name_len: self.name_len,
            version,
        }
    }

    /// True when both identifiers name the same logical stage.
    pub fn same_stage(&self, other: &StageId) -> bool {
        self.name() == other.name()
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for StageId {
    type Err = FulltextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StageId {
    type Error = FulltextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StageId> for String {
    fn from(value: StageId) -> Self {
        value.raw
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
