//! In-memory block document implementing [`AnchorDocument`].
//!
//! Blocks are flat runs of plain text and anchor wrappers. Anchors never nest;
//! overlapping annotations share one anchor carrying several ids. Structural
//! edits behave like a simple engine that does not copy wrapper attributes: a
//! split anchor is destroyed and replaced by fresh, id-less halves that are
//! reported as its successors.

use crate::document::{AnchorDocument, AnchorNode};
use crate::types::{IdSet, MutationBatch, NodeKey, NodeMutation, TextSpan};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorRun {
    key: NodeKey,
    ids: IdSet,
    text: String,
}

impl AnchorNode for AnchorRun {
    fn key(&self) -> NodeKey {
        self.key
    }

    fn ids(&self) -> &IdSet {
        &self.ids
    }

    fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Inline {
    Text(String),
    Anchor(AnchorRun),
}

impl Inline {
    fn text(&self) -> &str {
        match self {
            Inline::Text(text) => text,
            Inline::Anchor(run) => &run.text,
        }
    }

    fn char_len(&self) -> usize {
        self.text().chars().count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Block {
    inlines: Vec<Inline>,
}

/// Char offset to byte offset, clamped to the end of `text`.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(byte, _)| byte)
}

#[derive(Debug, Default)]
pub struct MemoryDocument {
    blocks: Vec<Block>,
    next_key: u64,
    pending: MutationBatch,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document with one plain paragraph per entry.
    pub fn from_paragraphs<'a>(paragraphs: impl IntoIterator<Item = &'a str>) -> Self {
        let mut doc = Self::new();
        for text in paragraphs {
            doc.push_paragraph(text);
        }
        doc
    }

    pub fn push_paragraph(&mut self, text: &str) -> usize {
        let mut block = Block::default();
        if !text.is_empty() {
            block.inlines.push(Inline::Text(text.to_owned()));
        }
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_text(&self, block: usize) -> Option<String> {
        self.blocks
            .get(block)
            .map(|b| b.inlines.iter().map(Inline::text).collect())
    }

    /// Render the document with anchors shown as `[id1,id2|text]`, one block
    /// per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for inline in &block.inlines {
                match inline {
                    Inline::Text(text) => out.push_str(text),
                    Inline::Anchor(run) => {
                        out.push('[');
                        out.push_str(&run.ids.to_string());
                        out.push('|');
                        out.push_str(&run.text);
                        out.push(']');
                    }
                }
            }
        }
        out
    }

    fn fresh_key(&mut self) -> NodeKey {
        self.next_key += 1;
        NodeKey(self.next_key)
    }

    fn locate(&self, key: NodeKey) -> Option<(usize, usize)> {
        self.blocks.iter().enumerate().find_map(|(b, block)| {
            block
                .inlines
                .iter()
                .position(|inline| matches!(inline, Inline::Anchor(run) if run.key == key))
                .map(|i| (b, i))
        })
    }

    fn run_mut(&mut self, key: NodeKey) -> Option<&mut AnchorRun> {
        let (b, i) = self.locate(key)?;
        match &mut self.blocks[b].inlines[i] {
            Inline::Anchor(run) => Some(run),
            Inline::Text(_) => None,
        }
    }

    /// Join adjacent plain text runs and drop empty ones.
    fn normalize(&mut self, block: usize) {
        let inlines = std::mem::take(&mut self.blocks[block].inlines);
        let mut out: Vec<Inline> = Vec::with_capacity(inlines.len());
        for inline in inlines {
            match (out.last_mut(), inline) {
                (_, Inline::Text(text)) if text.is_empty() => {}
                (Some(Inline::Text(prev)), Inline::Text(text)) => prev.push_str(&text),
                (_, inline) => out.push(inline),
            }
        }
        self.blocks[block].inlines = out;
    }

    /// Ensure an inline boundary at char `offset` of `block` and return the
    /// index of the inline starting there.
    ///
    /// With `structural` set, an anchor cut in two is destroyed and replaced by
    /// id-less halves reported as its successors. Otherwise the left half
    /// keeps the key and both halves keep the ids.
    fn split_at(&mut self, block: usize, offset: usize, structural: bool) -> usize {
        let mut start = 0;
        let mut index = 0;
        while index < self.blocks[block].inlines.len() {
            let len = self.blocks[block].inlines[index].char_len();
            if offset == start {
                return index;
            }
            if offset < start + len {
                let inline = self.blocks[block].inlines.remove(index);
                let text = inline.text();
                let at = byte_offset(text, offset - start);
                let (left, right) = (text[..at].to_owned(), text[at..].to_owned());
                let (left, right) = match inline {
                    Inline::Text(_) => (Inline::Text(left), Inline::Text(right)),
                    Inline::Anchor(run) if structural => {
                        let left_key = self.fresh_key();
                        let right_key = self.fresh_key();
                        self.pending.record(NodeMutation::Destroyed(run.key));
                        self.pending.record(NodeMutation::Created(left_key));
                        self.pending.record(NodeMutation::Created(right_key));
                        self.pending
                            .record_successors(run.key, vec![left_key, right_key]);
                        (
                            Inline::Anchor(AnchorRun {
                                key: left_key,
                                ids: IdSet::new(),
                                text: left,
                            }),
                            Inline::Anchor(AnchorRun {
                                key: right_key,
                                ids: IdSet::new(),
                                text: right,
                            }),
                        )
                    }
                    Inline::Anchor(run) => {
                        let right_key = self.fresh_key();
                        self.pending.record(NodeMutation::Updated(run.key));
                        self.pending.record(NodeMutation::Created(right_key));
                        (
                            Inline::Anchor(AnchorRun {
                                key: run.key,
                                ids: run.ids.clone(),
                                text: left,
                            }),
                            Inline::Anchor(AnchorRun {
                                key: right_key,
                                ids: run.ids,
                                text: right,
                            }),
                        )
                    }
                };
                self.blocks[block].inlines.insert(index, right);
                self.blocks[block].inlines.insert(index, left);
                return index + 1;
            }
            start += len;
            index += 1;
        }
        index
    }

    /// Split `block` at char `offset` into two blocks.
    pub fn split_block(&mut self, block: usize, offset: usize) -> bool {
        if block >= self.blocks.len() {
            return false;
        }
        let at = self.split_at(block, offset, true);
        let tail = self.blocks[block].inlines.split_off(at);
        self.blocks.insert(block + 1, Block { inlines: tail });
        true
    }

    /// Join block `block + 1` onto the end of `block`.
    pub fn merge_blocks(&mut self, block: usize) -> bool {
        if block + 1 >= self.blocks.len() {
            return false;
        }
        let next = self.blocks.remove(block + 1);
        for inline in &next.inlines {
            if let Inline::Anchor(run) = inline {
                self.pending.record(NodeMutation::Updated(run.key));
            }
        }
        self.blocks[block].inlines.extend(next.inlines);
        self.normalize(block);
        true
    }

    /// Delete the text covered by `span`. Anchors left without text are destroyed.
    pub fn delete_text(&mut self, span: TextSpan) -> bool {
        if span.block >= self.blocks.len() || span.is_empty() {
            return false;
        }
        let from = self.split_at(span.block, span.start, false);
        let to = self.split_at(span.block, span.end, false);
        let removed: Vec<Inline> = self.blocks[span.block].inlines.drain(from..to).collect();
        for inline in removed {
            if let Inline::Anchor(run) = inline {
                self.pending.record(NodeMutation::Destroyed(run.key));
            }
        }
        self.normalize(span.block);
        true
    }

    /// Insert plain text at char `offset` of `block`, outside any anchor.
    pub fn insert_text(&mut self, block: usize, offset: usize, text: &str) -> bool {
        if block >= self.blocks.len() {
            return false;
        }
        let at = self.split_at(block, offset, false);
        self.blocks[block]
            .inlines
            .insert(at, Inline::Text(text.to_owned()));
        self.normalize(block);
        true
    }
}

impl AnchorDocument for MemoryDocument {
    type Node = AnchorRun;

    fn anchor(&self, key: NodeKey) -> Option<&AnchorRun> {
        let (b, i) = self.locate(key)?;
        match &self.blocks[b].inlines[i] {
            Inline::Anchor(run) => Some(run),
            Inline::Text(_) => None,
        }
    }

    fn set_ids(&mut self, key: NodeKey, ids: IdSet) -> bool {
        let Some(run) = self.run_mut(key) else {
            return false;
        };
        if run.ids == ids {
            return true;
        }
        run.ids = ids;
        self.pending.record(NodeMutation::Updated(key));
        true
    }

    fn unwrap_anchor(&mut self, key: NodeKey) -> bool {
        let Some((b, i)) = self.locate(key) else {
            return false;
        };
        let text = self.blocks[b].inlines[i].text().to_owned();
        self.blocks[b].inlines[i] = Inline::Text(text);
        self.pending.record(NodeMutation::Destroyed(key));
        self.normalize(b);
        true
    }

    fn remove_anchor(&mut self, key: NodeKey) -> bool {
        let Some((b, i)) = self.locate(key) else {
            return false;
        };
        self.blocks[b].inlines.remove(i);
        self.pending.record(NodeMutation::Destroyed(key));
        self.normalize(b);
        true
    }

    fn next_anchor_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let (b, i) = self.locate(key)?;
        match self.blocks[b].inlines.get(i + 1)? {
            Inline::Anchor(run) => Some(run.key),
            Inline::Text(_) => None,
        }
    }

    fn prev_anchor_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let (b, i) = self.locate(key)?;
        match self.blocks[b].inlines.get(i.checked_sub(1)?)? {
            Inline::Anchor(run) => Some(run.key),
            Inline::Text(_) => None,
        }
    }

    fn merge_anchors(&mut self, keep: NodeKey, absorb: NodeKey) -> bool {
        if self.next_anchor_sibling(keep) != Some(absorb) {
            return false;
        }
        let Some((b, i)) = self.locate(absorb) else {
            return false;
        };
        let absorbed = self.blocks[b].inlines.remove(i);
        if let Some(run) = self.run_mut(keep) {
            run.text.push_str(absorbed.text());
        }
        self.pending.record(NodeMutation::Destroyed(absorb));
        self.pending.record_successors(absorb, vec![keep]);
        self.pending.record(NodeMutation::Updated(keep));
        true
    }

    fn wrap_span(&mut self, span: TextSpan, id: &str) -> Vec<NodeKey> {
        if span.block >= self.blocks.len() || span.is_empty() {
            return Vec::new();
        }
        let from = self.split_at(span.block, span.start, false);
        let to = self.split_at(span.block, span.end, false);
        let mut wrapped = Vec::new();
        for index in from..to {
            let key = match &mut self.blocks[span.block].inlines[index] {
                Inline::Anchor(run) => {
                    if run.ids.insert(id) {
                        self.pending.record(NodeMutation::Updated(run.key));
                    }
                    run.key
                }
                Inline::Text(text) => {
                    let text = std::mem::take(text);
                    let key = self.fresh_key();
                    self.blocks[span.block].inlines[index] = Inline::Anchor(AnchorRun {
                        key,
                        ids: IdSet::single(id),
                        text,
                    });
                    self.pending.record(NodeMutation::Created(key));
                    key
                }
            };
            wrapped.push(key);
        }
        wrapped
    }

    fn span_text(&self, span: TextSpan) -> Option<String> {
        let text = self.block_text(span.block)?;
        let start = byte_offset(&text, span.start);
        let end = byte_offset(&text, span.end);
        Some(text[start..end].to_owned())
    }

    fn take_mutations(&mut self) -> MutationBatch {
        std::mem::take(&mut self.pending)
    }

    fn anchors(&self) -> Vec<NodeKey> {
        self.blocks
            .iter()
            .flat_map(|block| block.inlines.iter())
            .filter_map(|inline| match inline {
                Inline::Anchor(run) => Some(run.key),
                Inline::Text(_) => None,
            })
            .collect()
    }
}
