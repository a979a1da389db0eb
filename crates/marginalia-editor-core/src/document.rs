//! The editing-engine collaborator seen from the annotation layer.

use crate::types::{IdSet, MutationBatch, NodeKey, TextSpan};

/// Capability interface for a node that can carry annotation ids.
pub trait AnchorNode {
    fn key(&self) -> NodeKey;

    fn ids(&self) -> &IdSet;

    /// Whether the node is a pure wrapper whose content can be re-parented.
    fn can_unwrap(&self) -> bool {
        true
    }

    fn text(&self) -> &str;
}

/// Operations the annotation layer needs from the editing engine.
///
/// Every structural change made through these methods is reported back in
/// the next [`AnchorDocument::take_mutations`] batch, just like edits made by
/// the user.
pub trait AnchorDocument {
    type Node: AnchorNode;

    /// Look up a live anchor node.
    fn anchor(&self, key: NodeKey) -> Option<&Self::Node>;

    /// Replace the id-set of an anchor node.
    fn set_ids(&mut self, key: NodeKey, ids: IdSet) -> bool;

    /// Remove the wrapper, keeping its content in place.
    fn unwrap_anchor(&mut self, key: NodeKey) -> bool;

    /// Remove the anchor together with its content.
    fn remove_anchor(&mut self, key: NodeKey) -> bool;

    /// The anchor immediately after `key` among its siblings, if any.
    fn next_anchor_sibling(&self, key: NodeKey) -> Option<NodeKey>;

    /// The anchor immediately before `key` among its siblings, if any.
    fn prev_anchor_sibling(&self, key: NodeKey) -> Option<NodeKey>;

    /// Append `absorb`'s content to `keep` and destroy `absorb`.
    fn merge_anchors(&mut self, keep: NodeKey, absorb: NodeKey) -> bool;

    /// Tag the content of `span` with `id`, creating or splitting anchors as
    /// needed. Returns the anchors that now carry `id` inside the span.
    fn wrap_span(&mut self, span: TextSpan, id: &str) -> Vec<NodeKey>;

    /// Plain text covered by `span`.
    fn span_text(&self, span: TextSpan) -> Option<String>;

    /// Drain pending anchor mutations.
    fn take_mutations(&mut self) -> MutationBatch;

    /// Every live anchor, in document order.
    fn anchors(&self) -> Vec<NodeKey>;
}
