//! Propagation resolver.
//!
//! When a document changes, related documents whose index entries embed its
//! content (a task summarizing its comments, for example) must be re-indexed.
//! The `propagate` map names, per changed class, the related classes; the
//! `propagate_classes` map narrows that to the classes actually affected.
//! Concrete documents are found by walking the attachment relation in both
//! directions.
//!
//! Propagated changes carry a hop count and are never propagated again, so
//! cyclic configuration cannot loop.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use fulltext_storage::DocumentSource;
use fulltext_types::{
    ClassHierarchy, ClassId, DocId, DocIndexState, FullTextSearchContext, QueuedChange,
};

use crate::error::IndexingError;

/// Maximum propagation depth for one original change.
pub const MAX_PROPAGATION_HOPS: u8 = 1;

/// Resolves related documents to re-enqueue.
#[derive(Debug, Clone, Default)]
pub struct PropagationResolver {
    hierarchy: ClassHierarchy,
    propagate: HashMap<ClassId, Vec<ClassId>>,
    propagate_classes: HashMap<ClassId, Vec<ClassId>>,
}

impl PropagationResolver {
    /// Resolver with explicit maps.
    pub fn new(
        hierarchy: ClassHierarchy,
        propagate: HashMap<ClassId, Vec<ClassId>>,
        propagate_classes: HashMap<ClassId, Vec<ClassId>>,
    ) -> Self {
        Self {
            hierarchy,
            propagate,
            propagate_classes,
        }
    }

    /// Derive both maps from per-class contexts.
    pub fn from_contexts(
        hierarchy: ClassHierarchy,
        contexts: &HashMap<ClassId, FullTextSearchContext>,
    ) -> Self {
        let mut propagate = HashMap::new();
        let mut propagate_classes = HashMap::new();
        for (class, ctx) in contexts {
            if !ctx.propagate.is_empty() {
                propagate.insert(class.clone(), ctx.propagate.clone());
            }
            if !ctx.propagate_classes.is_empty() {
                propagate_classes.insert(class.clone(), ctx.propagate_classes.clone());
            }
        }
        Self::new(hierarchy, propagate, propagate_classes)
    }

    /// Nearest map entry along the ancestor chain.
    fn lookup<'a>(
        &self,
        map: &'a HashMap<ClassId, Vec<ClassId>>,
        class: &str,
    ) -> Option<&'a Vec<ClassId>> {
        self.hierarchy
            .ancestors(class)
            .iter()
            .find_map(|c| map.get(c.as_str()))
    }

    /// Classes whose documents must be re-indexed when `class` changes.
    pub fn target_classes(&self, class: &str) -> Vec<ClassId> {
        let Some(targets) = self.lookup(&self.propagate, class) else {
            return Vec::new();
        };

        match self.lookup(&self.propagate_classes, class) {
            Some(narrow) => targets
                .iter()
                .filter(|t| narrow.iter().any(|n| self.hierarchy.is_derived(t, n)))
                .cloned()
                .collect(),
            None => targets.clone(),
        }
    }

    fn matches_any(&self, class: &str, targets: &[ClassId]) -> bool {
        targets.iter().any(|t| self.hierarchy.is_derived(class, t))
    }

    /// Related documents of `state` that belong to a target class.
    pub fn related(
        &self,
        state: &DocIndexState,
        source: &dyn DocumentSource,
    ) -> Result<Vec<DocId>, IndexingError> {
        let targets = self.target_classes(&state.object_class);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut related = BTreeSet::new();
        if let (Some(parent), Some(parent_class)) = (&state.attached_to, &state.attached_to_class) {
            if self.matches_any(parent_class, &targets) {
                related.insert(parent.clone());
            }
        }
        for child in source.attached_documents(&state.doc_id)? {
            if self.matches_any(&child.class, &targets) {
                related.insert(child.id);
            }
        }
        related.remove(&state.doc_id);
        Ok(related.into_iter().collect())
    }

    /// Plan propagated changes for one pass.
    ///
    /// `changed` holds the states touched by original (hop 0) changes.
    /// Targets are deduplicated across the pass and never include documents
    /// that changed themselves in the same pass.
    pub fn plan(
        &self,
        changed: &[(DocIndexState, QueuedChange)],
        source: &dyn DocumentSource,
    ) -> Result<Vec<(DocId, QueuedChange)>, IndexingError> {
        let in_pass: BTreeSet<&str> = changed.iter().map(|(s, _)| s.doc_id.as_str()).collect();
        let mut seen: BTreeSet<DocId> = BTreeSet::new();
        let mut planned = Vec::new();

        for (state, change) in changed {
            if change.hops >= MAX_PROPAGATION_HOPS {
                if !self.target_classes(&state.object_class).is_empty() {
                    debug!(
                        doc_id = %state.doc_id,
                        hops = change.hops,
                        "Propagation hop limit reached, dropping"
                    );
                }
                continue;
            }

            for target in self.related(state, source)? {
                if in_pass.contains(target.as_str()) || !seen.insert(target.clone()) {
                    continue;
                }
                debug!(from = %state.doc_id, to = %target, "Propagating change");
                planned.push((target, QueuedChange::propagated(change.hops + 1)));
            }
        }
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fulltext_storage::Storage;
    use fulltext_types::SourceDoc;
    use tempfile::TempDir;

    fn hierarchy() -> ClassHierarchy {
        ClassHierarchy::new()
            .with_class("doc", None)
            .with_class("task", Some("doc"))
            .with_class("subtask", Some("task"))
            .with_class("comment", Some("doc"))
            .with_class("attachment", Some("doc"))
    }

    fn contexts() -> HashMap<ClassId, FullTextSearchContext> {
        let mut contexts = HashMap::new();
        contexts.insert(
            "comment".to_string(),
            FullTextSearchContext {
                propagate: vec!["task".into()],
                ..Default::default()
            },
        );
        contexts.insert(
            "attachment".to_string(),
            FullTextSearchContext {
                propagate: vec!["task".into(), "comment".into()],
                propagate_classes: vec!["comment".into()],
                ..Default::default()
            },
        );
        contexts
    }

    fn storage() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_target_classes_narrowed() {
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());
        assert_eq!(resolver.target_classes("comment"), vec!["task".to_string()]);
        assert_eq!(
            resolver.target_classes("attachment"),
            vec!["comment".to_string()]
        );
        assert!(resolver.target_classes("task").is_empty());
    }

    #[test]
    fn test_comment_propagates_to_parent_task() {
        let (_temp, storage) = storage();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let comment = DocIndexState::new("c1", "comment").with_attached_to("t1", "task");
        let planned = resolver
            .plan(&[(comment, QueuedChange::updated())], &storage)
            .unwrap();

        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].0, "t1");
        assert_eq!(planned[0].1.hops, 1);
    }

    #[test]
    fn test_subclass_parent_matches() {
        let (_temp, storage) = storage();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let comment = DocIndexState::new("c1", "comment").with_attached_to("s1", "subtask");
        let planned = resolver
            .plan(&[(comment, QueuedChange::updated())], &storage)
            .unwrap();
        assert_eq!(planned[0].0, "s1");
    }

    #[test]
    fn test_dedup_within_pass() {
        let (_temp, storage) = storage();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let c1 = DocIndexState::new("c1", "comment").with_attached_to("t1", "task");
        let c2 = DocIndexState::new("c2", "comment").with_attached_to("t1", "task");
        let planned = resolver
            .plan(
                &[(c1, QueuedChange::updated()), (c2, QueuedChange::updated())],
                &storage,
            )
            .unwrap();
        assert_eq!(planned.len(), 1);
    }

    #[test]
    fn test_propagated_changes_do_not_propagate() {
        let (_temp, storage) = storage();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let comment = DocIndexState::new("c1", "comment").with_attached_to("t1", "task");
        let planned = resolver
            .plan(&[(comment, QueuedChange::propagated(1))], &storage)
            .unwrap();
        assert!(planned.is_empty());
    }

    #[test]
    fn test_children_found_through_source() {
        let (_temp, storage) = storage();
        storage
            .put_document(&SourceDoc::new("c1", "comment").attached("a1", "attachment"))
            .unwrap();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let attachment = DocIndexState::new("a1", "attachment");
        let planned = resolver
            .plan(&[(attachment, QueuedChange::updated())], &storage)
            .unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].0, "c1");
    }

    #[test]
    fn test_target_changed_in_same_pass_is_skipped() {
        let (_temp, storage) = storage();
        let resolver = PropagationResolver::from_contexts(hierarchy(), &contexts());

        let comment = DocIndexState::new("c1", "comment").with_attached_to("t1", "task");
        let task = DocIndexState::new("t1", "task");
        let planned = resolver
            .plan(
                &[
                    (comment, QueuedChange::updated()),
                    (task, QueuedChange::updated()),
                ],
                &storage,
            )
            .unwrap();
        assert!(planned.is_empty());
    }
}
