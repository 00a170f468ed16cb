//! Class hierarchy and per-class full-text contexts.
//!
//! The hierarchy is supplied by the model collaborator. Stages and the
//! propagation resolver consult it to decide which rules apply to a class:
//! a context declared on an ancestor applies to all descendants unless a
//! nearer class declares its own.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::FulltextError;
use crate::ClassId;

/// Per-class indexing behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTextSearchContext {
    /// Build a summary for documents of this class
    #[serde(default)]
    pub full_text_summary: bool,

    /// Index even when no attribute is marked for full-text
    #[serde(default)]
    pub force_index: bool,

    /// Classes of related documents to re-index when this class changes
    #[serde(default)]
    pub propagate: Vec<ClassId>,

    /// Narrows `propagate` to the classes actually affected
    #[serde(default)]
    pub propagate_classes: Vec<ClassId>,

    /// Include attached children's text when summarizing
    #[serde(default)]
    pub child_processing_allowed: bool,
}

/// Single-inheritance class hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    parents: HashMap<ClassId, Option<ClassId>>,
}

impl ClassHierarchy {
    /// Empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class with an optional parent.
    pub fn add_class(&mut self, class: impl Into<ClassId>, parent: Option<&str>) -> &mut Self {
        let class = class.into();
        if let Some(parent) = parent {
            self.parents.entry(parent.to_string()).or_insert(None);
        }
        self.parents.insert(class, parent.map(|p| p.to_string()));
        self
    }

    /// Builder form of [`ClassHierarchy::add_class`].
    pub fn with_class(mut self, class: impl Into<ClassId>, parent: Option<&str>) -> Self {
        self.add_class(class, parent);
        self
    }

    /// True if the class is known.
    pub fn contains(&self, class: &str) -> bool {
        self.parents.contains_key(class)
    }

    /// The class itself followed by its ancestors, nearest first.
    ///
    /// Unknown classes yield just themselves.
    pub fn ancestors(&self, class: &str) -> Vec<ClassId> {
        let mut chain = vec![class.to_string()];
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        seen.insert(class);

        let mut current = class;
        while let Some(Some(parent)) = self.parents.get(current) {
            if !seen.insert(parent.as_str()) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    /// True if `class` is `ancestor` or derives from it.
    pub fn is_derived(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).iter().any(|c| c == ancestor)
    }

    /// The class itself plus every known descendant.
    pub fn descendants(&self, class: &str) -> Vec<ClassId> {
        let mut result: Vec<ClassId> = self
            .parents
            .keys()
            .filter(|c| self.is_derived(c, class))
            .cloned()
            .collect();
        if !result.iter().any(|c| c == class) {
            result.push(class.to_string());
        }
        result.sort();
        result
    }

    /// Nearest context declared on the class or one of its ancestors.
    pub fn find_context<'a>(
        &self,
        contexts: &'a HashMap<ClassId, FullTextSearchContext>,
        class: &str,
    ) -> Option<&'a FullTextSearchContext> {
        self.ancestors(class)
            .iter()
            .find_map(|c| contexts.get(c.as_str()))
    }

    /// Reject cycles.
    pub fn validate(&self) -> Result<(), FulltextError> {
        for class in self.parents.keys() {
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            let mut current = class.as_str();
            seen.insert(current);
            while let Some(Some(parent)) = self.parents.get(current) {
                if !seen.insert(parent.as_str()) {
                    return Err(FulltextError::Hierarchy(format!(
                        "cycle through class {}",
                        parent
                    )));
                }
                current = parent;
            }
        }
        Ok(())
    }

    /// Number of known classes.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// True when no class is known.
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClassHierarchy {
        ClassHierarchy::new()
            .with_class("doc", None)
            .with_class("task", Some("doc"))
            .with_class("subtask", Some("task"))
            .with_class("comment", Some("doc"))
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let h = sample();
        assert_eq!(h.ancestors("subtask"), vec!["subtask", "task", "doc"]);
        assert_eq!(h.ancestors("unknown"), vec!["unknown"]);
    }

    #[test]
    fn test_is_derived() {
        let h = sample();
        assert!(h.is_derived("subtask", "doc"));
        assert!(h.is_derived("task", "task"));
        assert!(!h.is_derived("comment", "task"));
    }

    #[test]
    fn test_descendants() {
        let h = sample();
        assert_eq!(h.descendants("task"), vec!["subtask", "task"]);
        assert_eq!(h.descendants("missing"), vec!["missing"]);
    }

    #[test]
    fn test_find_context_nearest_wins() {
        let h = sample();
        let mut contexts = HashMap::new();
        contexts.insert(
            "doc".to_string(),
            FullTextSearchContext {
                force_index: true,
                ..Default::default()
            },
        );
        contexts.insert(
            "task".to_string(),
            FullTextSearchContext {
                full_text_summary: true,
                ..Default::default()
            },
        );

        assert!(h.find_context(&contexts, "subtask").unwrap().full_text_summary);
        assert!(h.find_context(&contexts, "comment").unwrap().force_index);
        assert!(h.find_context(&contexts, "other").is_none());
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut h = sample();
        assert!(h.validate().is_ok());

        h.add_class("doc", Some("subtask"));
        assert!(matches!(h.validate(), Err(FulltextError::Hierarchy(_))));
        // ancestors still terminates
        assert!(h.ancestors("task").len() <= 3);
    }
}
