//! Core anchor types: node keys, id sets, spans and mutation batches.
//!
//! These types are engine-agnostic. Any editing engine that can report node
//! mutations in this shape can drive an [`crate::AnchorBinding`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use smol_str::SmolStr;

/// Stable identifier of a node in the editing engine's tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(pub u64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Ordered set of annotation ids carried by one anchor node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdSet(BTreeSet<SmolStr>);

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(id: impl Into<SmolStr>) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    pub fn insert(&mut self, id: impl Into<SmolStr>) -> bool {
        self.0.insert(id.into())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SmolStr> {
        self.0.iter()
    }

    /// Union of both sets.
    pub fn union(&self, other: &IdSet) -> IdSet {
        IdSet(self.0.union(&other.0).cloned().collect())
    }

    /// Ids in `self` that are not in `other`.
    pub fn difference<'a>(&'a self, other: &'a IdSet) -> impl Iterator<Item = &'a SmolStr> {
        self.0.difference(&other.0)
    }
}

impl<S: Into<SmolStr>> FromIterator<S> for IdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        IdSet(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(id)?;
        }
        Ok(())
    }
}

/// A character range inside one block of the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextSpan {
    pub block: usize,
    /// Char offset (NOT byte offset)
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(block: usize, start: usize, end: usize) -> Self {
        Self {
            block,
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One entry of a mutation batch, as reported by the editing engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMutation {
    Created(NodeKey),
    Updated(NodeKey),
    Destroyed(NodeKey),
}

impl NodeMutation {
    pub fn key(&self) -> NodeKey {
        match self {
            Self::Created(key) | Self::Updated(key) | Self::Destroyed(key) => *key,
        }
    }
}

/// Anchor-node mutations since the last batch, plus successor hints for
/// destroyed nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub mutations: Vec<NodeMutation>,
    /// Destroyed node -> the nodes the engine considers its structural successors.
    pub successors: HashMap<NodeKey, Vec<NodeKey>>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Record a mutation, coalescing with an earlier entry for the same key.
    ///
    /// A node created and destroyed within one batch is never reported.
    pub fn record(&mut self, mutation: NodeMutation) {
        let key = mutation.key();
        let existing = self.mutations.iter().position(|m| m.key() == key);
        match (existing.map(|i| (i, self.mutations[i])), mutation) {
            (None, _) => self.mutations.push(mutation),
            (Some((i, NodeMutation::Created(_))), NodeMutation::Destroyed(_)) => {
                self.mutations.remove(i);
                self.successors.remove(&key);
            }
            (Some(_), NodeMutation::Updated(_)) => {}
            (Some((i, _)), _) => self.mutations[i] = mutation,
        }
    }

    pub fn record_successors(&mut self, destroyed: NodeKey, successors: Vec<NodeKey>) {
        self.successors.insert(destroyed, successors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_set_display_is_sorted() {
        let ids: IdSet = ["t2", "suggestion:s1:insert", "t1"].into_iter().collect();
        assert_eq!(ids.to_string(), "suggestion:s1:insert,t1,t2");
    }

    #[test]
    fn test_created_then_destroyed_is_dropped() {
        let mut batch = MutationBatch::default();
        batch.record(NodeMutation::Created(NodeKey(1)));
        batch.record(NodeMutation::Updated(NodeKey(1)));
        assert_eq!(batch.mutations, vec![NodeMutation::Created(NodeKey(1))]);
        batch.record(NodeMutation::Destroyed(NodeKey(1)));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_updated_then_destroyed_keeps_destroyed() {
        let mut batch = MutationBatch::default();
        batch.record(NodeMutation::Updated(NodeKey(4)));
        batch.record(NodeMutation::Destroyed(NodeKey(4)));
        assert_eq!(batch.mutations, vec![NodeMutation::Destroyed(NodeKey(4))]);
    }
}
