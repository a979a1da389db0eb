//! Bidirectional index between annotation ids and anchor nodes.
//!
//! The document is the source of truth for which ids a node carries. The
//! binding keeps the reverse direction (id -> nodes) plus a memo of each
//! node's last known ids, which is the only way to learn what a destroyed
//! node was carrying.

use std::collections::{BTreeSet, HashMap};

use smol_str::SmolStr;

use crate::document::{AnchorDocument, AnchorNode};
use crate::marks::MarkId;
use crate::types::{IdSet, MutationBatch, NodeKey, NodeMutation, TextSpan};

/// Follow-up rounds before giving up on a batch that keeps producing mutations.
const MAX_ROUNDS: usize = 64;

#[derive(Debug, Default)]
pub struct AnchorBinding {
    /// Thread id -> nodes.
    threads: HashMap<SmolStr, BTreeSet<NodeKey>>,
    /// Suggestion id -> nodes carrying one of its content marks.
    suggestions: HashMap<SmolStr, BTreeSet<NodeKey>>,
    /// Node -> ids it carried when last seen.
    node_ids: HashMap<NodeKey, IdSet>,
}

impl AnchorBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes currently anchoring a thread.
    pub fn nodes_for(&self, thread_id: &str) -> Vec<NodeKey> {
        self.threads
            .get(thread_id)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes carrying content marks of a suggestion.
    pub fn suggestion_nodes(&self, suggestion_id: &str) -> Vec<NodeKey> {
        self.suggestions
            .get(suggestion_id)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    pub fn thread_ids(&self) -> impl Iterator<Item = &SmolStr> {
        self.threads.keys()
    }

    pub fn suggestion_ids(&self) -> impl Iterator<Item = &SmolStr> {
        self.suggestions.keys()
    }

    /// Last known ids of a node.
    pub fn ids_of(&self, key: NodeKey) -> Option<&IdSet> {
        self.node_ids.get(&key)
    }

    /// Index every anchor already present in the document.
    pub fn rebuild<D: AnchorDocument>(&mut self, doc: &mut D) {
        self.threads.clear();
        self.suggestions.clear();
        self.node_ids.clear();
        let batch = MutationBatch {
            mutations: doc.anchors().into_iter().map(NodeMutation::Created).collect(),
            ..Default::default()
        };
        self.apply(doc, batch);
    }

    /// Drain the document's pending mutations and apply them.
    pub fn sync<D: AnchorDocument>(&mut self, doc: &mut D) {
        let batch = doc.take_mutations();
        self.apply(doc, batch);
    }

    /// Apply a mutation batch, then any follow-up mutations caused by
    /// carrying ids, unwrapping or merging, until the document is quiet.
    pub fn apply<D: AnchorDocument>(&mut self, doc: &mut D, mut batch: MutationBatch) {
        for _ in 0..MAX_ROUNDS {
            if batch.is_empty() {
                return;
            }
            self.apply_round(doc, &batch);
            batch = doc.take_mutations();
        }
        tracing::warn!(
            pending = batch.mutations.len(),
            "anchor normalization did not settle"
        );
    }

    fn apply_round<D: AnchorDocument>(&mut self, doc: &mut D, batch: &MutationBatch) {
        // Destroyed nodes hand their ids to successors before anything else
        // looks at those successors.
        for mutation in &batch.mutations {
            let NodeMutation::Destroyed(key) = *mutation else {
                continue;
            };
            let carried = self.forget(key);
            let Some(carried) = carried.filter(|ids| !ids.is_empty()) else {
                continue;
            };
            for successor in batch.successors.get(&key).into_iter().flatten() {
                let Some(node) = doc.anchor(*successor) else {
                    continue;
                };
                let merged = node.ids().union(&carried);
                if merged != *node.ids() {
                    tracing::trace!(from = %key, to = %successor, ids = %carried, "carrying anchor ids");
                    doc.set_ids(*successor, merged);
                }
            }
        }

        let mut touched = Vec::new();
        for mutation in &batch.mutations {
            match *mutation {
                NodeMutation::Created(key) | NodeMutation::Updated(key) => {
                    match doc.anchor(key) {
                        Some(node) => {
                            let ids = node.ids().clone();
                            self.index(key, ids);
                            touched.push(key);
                        }
                        None => {
                            self.forget(key);
                        }
                    }
                }
                NodeMutation::Destroyed(_) => {}
            }
        }

        for key in touched {
            let Some(node) = doc.anchor(key) else {
                continue;
            };
            if node.ids().is_empty() {
                if node.can_unwrap() {
                    doc.unwrap_anchor(key);
                    self.forget(key);
                }
                continue;
            }
            let ids = node.ids().clone();
            if let Some(next) = doc.next_anchor_sibling(key) {
                if doc.anchor(next).is_some_and(|n| *n.ids() == ids) {
                    doc.merge_anchors(key, next);
                    continue;
                }
            }
            if let Some(prev) = doc.prev_anchor_sibling(key) {
                if doc.anchor(prev).is_some_and(|n| *n.ids() == ids) {
                    doc.merge_anchors(prev, key);
                }
            }
        }
    }

    /// Record `ids` as the current ids of `key`, updating the reverse index.
    fn index(&mut self, key: NodeKey, ids: IdSet) {
        let previous = self.node_ids.insert(key, ids.clone()).unwrap_or_default();
        for gone in previous.difference(&ids) {
            self.unlink(gone, key);
        }
        for id in ids.iter() {
            match MarkId::parse(id) {
                MarkId::Thread(thread) => {
                    self.threads.entry(thread.into()).or_default().insert(key);
                }
                MarkId::Suggestion { id, .. } => {
                    self.suggestions.entry(id.into()).or_default().insert(key);
                }
            }
        }
    }

    /// Drop a node from the index, returning the ids it carried.
    fn forget(&mut self, key: NodeKey) -> Option<IdSet> {
        let ids = self.node_ids.remove(&key)?;
        for id in ids.iter() {
            self.unlink(id, key);
        }
        Some(ids)
    }

    fn unlink(&mut self, raw: &str, key: NodeKey) {
        let (map, id) = match MarkId::parse(raw) {
            MarkId::Thread(id) => (&mut self.threads, id),
            MarkId::Suggestion { id, .. } => (&mut self.suggestions, id),
        };
        if let Some(keys) = map.get_mut(id) {
            keys.remove(&key);
            if keys.is_empty() {
                map.remove(id);
            }
        }
    }

    /// Tag `span` with `id` and index the resulting anchors.
    pub fn bind_span<D: AnchorDocument>(
        &mut self,
        doc: &mut D,
        span: TextSpan,
        id: &str,
    ) -> Vec<NodeKey> {
        let wrapped = doc.wrap_span(span, id);
        self.sync(doc);
        wrapped
    }

    /// Remove the exact mark `raw` from every node carrying it. Emptied nodes
    /// are unwrapped. Returns how many nodes were touched.
    pub fn detach<D: AnchorDocument>(&mut self, doc: &mut D, raw: &str) -> usize {
        let carriers = self.carriers(raw);
        for key in &carriers {
            let Some(node) = doc.anchor(*key) else {
                continue;
            };
            let mut ids = node.ids().clone();
            ids.remove(raw);
            doc.set_ids(*key, ids);
        }
        self.sync(doc);
        carriers.len()
    }

    /// Remove every node carrying the exact mark `raw`, content included.
    pub fn remove_marked<D: AnchorDocument>(&mut self, doc: &mut D, raw: &str) -> usize {
        let carriers = self.carriers(raw);
        for key in &carriers {
            doc.remove_anchor(*key);
        }
        self.sync(doc);
        carriers.len()
    }

    fn carriers(&self, raw: &str) -> Vec<NodeKey> {
        let mut keys: Vec<NodeKey> = self
            .node_ids
            .iter()
            .filter(|(_, ids)| ids.contains(raw))
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDocument;
    use crate::marks::{SuggestionMarkKind, suggestion_mark_id};

    fn setup(text: &str) -> (MemoryDocument, AnchorBinding) {
        (MemoryDocument::from_paragraphs([text]), AnchorBinding::new())
    }

    #[test]
    fn test_split_carries_overlapping_ids_to_both_halves() {
        let (mut doc, mut binding) = setup("the quick brown fox");
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 15), "t1");
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 15), "t2");
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 15), "t3");
        assert_eq!(doc.render(), "the [t1,t2,t3|quick brown] fox");

        doc.split_block(0, 10);
        binding.sync(&mut doc);

        insta::assert_snapshot!(doc.render(), @r"
        the [t1,t2,t3|quick ]
        [t1,t2,t3|brown] fox
        ");
        for id in ["t1", "t2", "t3"] {
            assert_eq!(binding.nodes_for(id).len(), 2, "{id} should span both halves");
        }
    }

    #[test]
    fn test_destroyed_node_without_successor_unbinds() {
        let (mut doc, mut binding) = setup("keep this gone");
        binding.bind_span(&mut doc, TextSpan::new(0, 10, 14), "t1");
        assert!(binding.is_bound("t1"));

        doc.delete_text(TextSpan::new(0, 9, 14));
        binding.sync(&mut doc);
        assert!(!binding.is_bound("t1"));
        assert_eq!(binding.thread_ids().count(), 0);
    }

    #[test]
    fn test_rejoined_halves_merge_back() {
        let (mut doc, mut binding) = setup("abcdef");
        binding.bind_span(&mut doc, TextSpan::new(0, 1, 5), "t1");
        doc.split_block(0, 3);
        binding.sync(&mut doc);
        assert_eq!(binding.nodes_for("t1").len(), 2);

        doc.merge_blocks(0);
        binding.sync(&mut doc);
        assert_eq!(doc.render(), "a[t1|bcde]f");
        assert_eq!(binding.nodes_for("t1").len(), 1);
    }

    #[test]
    fn test_adjacent_equal_anchors_merge() {
        let (mut doc, mut binding) = setup("aabb");
        binding.bind_span(&mut doc, TextSpan::new(0, 0, 2), "t1");
        binding.bind_span(&mut doc, TextSpan::new(0, 2, 4), "t1");
        assert_eq!(doc.render(), "[t1|aabb]");
        assert_eq!(binding.nodes_for("t1").len(), 1);
    }

    #[test]
    fn test_detach_unwraps_emptied_nodes_only() {
        let (mut doc, mut binding) = setup("one two three");
        binding.bind_span(&mut doc, TextSpan::new(0, 0, 7), "t1");
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 13), "t2");
        assert_eq!(doc.render(), "[t1|one ][t1,t2|two][t2| three]");

        assert_eq!(binding.detach(&mut doc, "t1"), 2);
        assert_eq!(doc.render(), "one [t2|two three]");
        assert!(!binding.is_bound("t1"));
        assert_eq!(binding.nodes_for("t2").len(), 1);
    }

    #[test]
    fn test_suggestion_marks_are_tracked_apart_from_threads() {
        let (mut doc, mut binding) = setup("old new");
        let insert = suggestion_mark_id("s1", SuggestionMarkKind::Insert);
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 7), "s1");
        binding.bind_span(&mut doc, TextSpan::new(0, 4, 7), &insert);

        assert!(binding.is_bound("s1"));
        assert_eq!(binding.suggestion_nodes("s1").len(), 1);
        assert_eq!(binding.thread_ids().collect::<Vec<_>>(), vec!["s1"]);
        assert_eq!(binding.suggestion_ids().collect::<Vec<_>>(), vec!["s1"]);

        assert_eq!(binding.remove_marked(&mut doc, &insert), 1);
        assert_eq!(doc.render(), "old ");
        assert!(!binding.is_bound("s1"));
    }

    #[test]
    fn test_rebuild_indexes_existing_anchors() {
        let (mut doc, mut binding) = setup("abc");
        doc.wrap_span(TextSpan::new(0, 0, 1), "t1");
        binding.rebuild(&mut doc);
        assert_eq!(binding.nodes_for("t1").len(), 1);
    }
}
