//! Change notifications fed into the pipeline queue.
//!
//! Multiple notifications for the same document coalesce into one
//! [`QueuedChange`]: `create` wins over a plain update, and `removed`
//! overrides both.

use serde::{Deserialize, Serialize};

use crate::state::DocIndexState;

/// Effective kind of a coalesced change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First observation of the document
    Create,
    /// Document content changed
    Update,
    /// Document was deleted
    Remove,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Remove => write!(f, "remove"),
        }
    }
}

/// A pending change for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChange {
    /// Initial state when the document is new
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<DocIndexState>,

    /// Content changed
    #[serde(default)]
    pub updated: bool,

    /// Document removed
    #[serde(default)]
    pub removed: bool,

    /// Propagation hops that produced this change (0 = original event)
    #[serde(default)]
    pub hops: u8,
}

impl QueuedChange {
    /// A newly observed document.
    pub fn created(state: DocIndexState) -> Self {
        Self {
            create: Some(state),
            updated: false,
            removed: false,
            hops: 0,
        }
    }

    /// A content update.
    pub fn updated() -> Self {
        Self {
            create: None,
            updated: true,
            removed: false,
            hops: 0,
        }
    }

    /// A removal.
    pub fn removed() -> Self {
        Self {
            create: None,
            updated: false,
            removed: true,
            hops: 0,
        }
    }

    /// An update produced by propagation from a related document.
    pub fn propagated(hops: u8) -> Self {
        Self {
            hops,
            ..Self::updated()
        }
    }

    /// Effective kind after coalescing.
    pub fn kind(&self) -> ChangeKind {
        if self.removed {
            ChangeKind::Remove
        } else if self.create.is_some() {
            ChangeKind::Create
        } else {
            ChangeKind::Update
        }
    }

    /// Fold a later notification for the same document into this one.
    pub fn merge(&mut self, later: QueuedChange) {
        if later.create.is_some() {
            self.create = later.create;
        }
        self.updated |= later.updated;
        self.removed |= later.removed;
        // An original event dominates a propagated one
        self.hops = self.hops.min(later.hops);
    }
}
