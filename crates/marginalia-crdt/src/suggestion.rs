//! Suggested edits: replicated resolution state and the accept/reject flow.

use std::collections::VecDeque;

use loro::{Container, LoroDoc, LoroMap, ValueOrContainer};
use marginalia_editor_core::{AnchorBinding, AnchorDocument, SuggestionMarkKind, suggestion_mark_id};
use smol_str::SmolStr;

use crate::annotations::{AnnotationStore, MutationSource, ThreadPatch, ThreadStatus, now_millis};
use crate::error::CrdtError;

/// Root map holding one record per suggestion.
pub const SUGGESTIONS_MAP: &str = "suggestions";

const ORIGIN: &str = "suggestion-states";

const KEY_STATE: &str = "state";
const KEY_KIND: &str = "kind";
const KEY_AUTHOR_ID: &str = "authorId";
const KEY_CREATED_AT: &str = "createdAt";
const KEY_UPDATED_AT: &str = "updatedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionState {
    Open,
    Accepted,
    Rejected,
}

impl SuggestionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// What a suggestion proposes to do to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Insert,
    Delete,
    /// Delete some content and insert a replacement.
    Replace,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "insert" => Some(Self::Insert),
            "delete" => Some(Self::Delete),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    Accept,
    Reject,
}

impl ResolveAction {
    pub fn terminal_state(self) -> SuggestionState {
        match self {
            Self::Accept => SuggestionState::Accepted,
            Self::Reject => SuggestionState::Rejected,
        }
    }

    pub fn thread_status(self) -> ThreadStatus {
        match self {
            Self::Accept => ThreadStatus::Accepted,
            Self::Reject => ThreadStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionRecord {
    pub id: SmolStr,
    pub kind: SuggestionKind,
    pub state: SuggestionState,
    pub author_id: SmolStr,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Resolution state of every suggestion, kept in a replicated map so that
/// all replicas agree on whether a suggestion is still open.
pub struct SuggestionStates {
    doc: LoroDoc,
    map: LoroMap,
}

impl SuggestionStates {
    pub fn new(doc: &LoroDoc) -> Self {
        Self {
            doc: doc.clone(),
            map: doc.get_map(SUGGESTIONS_MAP),
        }
    }

    /// States that are never shared with anyone.
    pub fn local() -> Self {
        Self::new(&LoroDoc::new())
    }

    /// Record a new open suggestion. Returns `false` if `id` already exists.
    pub fn open(
        &self,
        id: &str,
        kind: SuggestionKind,
        author_id: &str,
    ) -> Result<bool, CrdtError> {
        if self.record_map(id).is_some() {
            return Ok(false);
        }
        let now = now_millis();
        let record = self.map.insert_container(id, LoroMap::new())?;
        record.insert(KEY_STATE, SuggestionState::Open.as_str())?;
        record.insert(KEY_KIND, kind.as_str())?;
        record.insert(KEY_AUTHOR_ID, author_id)?;
        record.insert(KEY_CREATED_AT, now)?;
        record.insert(KEY_UPDATED_AT, now)?;
        self.commit();
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<SuggestionRecord> {
        let record = self.record_map(id)?;
        let text = |key: &str| match record.get(key) {
            Some(ValueOrContainer::Value(v)) => v.as_string().map(|s| s.to_string()),
            _ => None,
        };
        let millis = |key: &str| match record.get(key) {
            Some(ValueOrContainer::Value(v)) => v.as_i64().copied(),
            _ => None,
        };
        Some(SuggestionRecord {
            id: SmolStr::new(id),
            kind: text(KEY_KIND)
                .and_then(|k| SuggestionKind::parse(&k))
                .unwrap_or(SuggestionKind::Insert),
            state: text(KEY_STATE)
                .and_then(|s| SuggestionState::parse(&s))
                .unwrap_or(SuggestionState::Open),
            author_id: text(KEY_AUTHOR_ID).map(SmolStr::from).unwrap_or_default(),
            created_at: millis(KEY_CREATED_AT).unwrap_or(0),
            updated_at: millis(KEY_UPDATED_AT).unwrap_or(0),
        })
    }

    pub fn state(&self, id: &str) -> Option<SuggestionState> {
        self.get(id).map(|r| r.state)
    }

    /// Every known suggestion, ordered by id.
    pub fn records(&self) -> Vec<SuggestionRecord> {
        let mut ids = Vec::new();
        self.map.for_each(|key, _| ids.push(key.to_string()));
        ids.sort();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Move an open suggestion to its terminal state. Only `open -> accepted`
    /// and `open -> rejected` are allowed; anything else returns `false`.
    pub fn transition(&self, id: &str, action: ResolveAction) -> Result<bool, CrdtError> {
        let Some(record) = self.record_map(id) else {
            return Ok(false);
        };
        let current = self.get(id).map(|r| r.state);
        if current != Some(SuggestionState::Open) {
            return Ok(false);
        }
        record.insert(KEY_STATE, action.terminal_state().as_str())?;
        record.insert(KEY_UPDATED_AT, now_millis())?;
        self.commit();
        Ok(true)
    }

    fn record_map(&self, id: &str) -> Option<LoroMap> {
        match self.map.get(id)? {
            ValueOrContainer::Container(Container::Map(map)) => Some(map),
            _ => None,
        }
    }

    fn commit(&self) {
        self.doc.set_next_commit_origin(ORIGIN);
        self.doc.commit();
    }
}

/// Work that must wait until the current edit has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredTask {
    /// Strip a removed thread's id from the document, unless the thread has
    /// come back in the meantime.
    DetachThread { thread_id: SmolStr },
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    tasks: VecDeque<DeferredTask>,
}

impl DeferredQueue {
    pub fn push(&mut self, task: DeferredTask) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every queued task. Each one re-checks its preconditions first.
    /// Returns how many tasks actually did something.
    pub fn run<D: AnchorDocument>(
        &mut self,
        store: &AnnotationStore,
        binding: &mut AnchorBinding,
        doc: &mut D,
    ) -> usize {
        let mut executed = 0;
        while let Some(task) = self.tasks.pop_front() {
            match task {
                DeferredTask::DetachThread { thread_id } => {
                    if store.thread(&thread_id).is_some() {
                        tracing::debug!(%thread_id, "thread was recreated, keeping its anchors");
                        continue;
                    }
                    let touched = binding.detach(doc, &thread_id);
                    tracing::trace!(%thread_id, touched, "detached thread anchors");
                    executed += 1;
                }
            }
        }
        executed
    }
}

/// Whether resolving a suggestion removes the content under `mark`, rather
/// than keeping the content and dropping the mark.
pub fn removes_content(kind: SuggestionKind, action: ResolveAction, mark: SuggestionMarkKind) -> bool {
    use ResolveAction::*;
    use SuggestionMarkKind as Mark;
    matches!(
        (kind, action, mark),
        (SuggestionKind::Insert, Reject, Mark::Insert)
            | (SuggestionKind::Delete, Accept, Mark::Delete)
            | (SuggestionKind::Replace, Accept, Mark::Delete)
            | (SuggestionKind::Replace, Reject, Mark::Insert)
    )
}

/// Accepts and rejects suggestions, queuing the cleanup that has to wait.
#[derive(Debug, Default)]
pub struct SuggestionResolution {
    deferred: DeferredQueue,
}

impl SuggestionResolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, task: DeferredTask) {
        self.deferred.push(task);
    }

    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    pub fn run_deferred<D: AnchorDocument>(
        &mut self,
        store: &AnnotationStore,
        binding: &mut AnchorBinding,
        doc: &mut D,
    ) -> usize {
        self.deferred.run(store, binding, doc)
    }

    /// Accept or reject an open suggestion.
    ///
    /// Returns `false` without touching anything if the suggestion is unknown
    /// or already resolved. Otherwise the terminal state is recorded, the
    /// suggested content is applied or dropped, the suggestion's thread is
    /// removed, and detaching the thread's anchors is deferred.
    pub fn resolve<D: AnchorDocument>(
        &mut self,
        id: &str,
        action: ResolveAction,
        states: &SuggestionStates,
        store: &mut AnnotationStore,
        binding: &mut AnchorBinding,
        doc: &mut D,
    ) -> Result<bool, CrdtError> {
        let Some(record) = states.get(id) else {
            tracing::debug!(%id, "resolve for unknown suggestion");
            return Ok(false);
        };
        if record.state != SuggestionState::Open {
            tracing::debug!(%id, state = record.state.as_str(), "suggestion already resolved");
            return Ok(false);
        }
        if !states.transition(id, action)? {
            return Ok(false);
        }

        // Look the thread up before its anchors can be unwrapped with the
        // suggested content.
        let thread_id = if binding.is_bound(id) {
            SmolStr::new(id)
        } else {
            store
                .thread_by_mark_id(id)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| SmolStr::new(id))
        };
        for mark in [SuggestionMarkKind::Insert, SuggestionMarkKind::Delete] {
            let raw = suggestion_mark_id(id, mark);
            let touched = if removes_content(record.kind, action, mark) {
                binding.remove_marked(doc, &raw)
            } else {
                binding.detach(doc, &raw)
            };
            if touched > 0 {
                tracing::trace!(mark = %raw, touched, "resolved suggestion content");
            }
        }

        if store.thread(&thread_id).is_some() {
            store.update_thread(
                &thread_id,
                ThreadPatch::status(action.thread_status()),
                MutationSource::Local,
            )?;
            store.delete(&thread_id, None, MutationSource::Local)?;
        }
        self.deferred.push(DeferredTask::DetachThread { thread_id });

        tracing::info!(
            %id,
            kind = record.kind.as_str(),
            state = action.terminal_state().as_str(),
            "suggestion resolved"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_open_suggestions_transition() {
        let states = SuggestionStates::local();
        assert!(states.open("s1", SuggestionKind::Replace, "u1").unwrap());
        assert!(!states.open("s1", SuggestionKind::Insert, "u2").unwrap());
        assert_eq!(states.state("s1"), Some(SuggestionState::Open));

        assert!(states.transition("s1", ResolveAction::Accept).unwrap());
        assert_eq!(states.state("s1"), Some(SuggestionState::Accepted));
        assert!(!states.transition("s1", ResolveAction::Reject).unwrap());
        assert_eq!(states.state("s1"), Some(SuggestionState::Accepted));

        assert!(!states.transition("missing", ResolveAction::Accept).unwrap());
        let record = states.get("s1").unwrap();
        assert_eq!(record.kind, SuggestionKind::Replace);
        assert_eq!(record.author_id, "u1");
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_records_are_listed_by_id() {
        let states = SuggestionStates::local();
        states.open("b", SuggestionKind::Delete, "u").unwrap();
        states.open("a", SuggestionKind::Insert, "u").unwrap();
        let ids: Vec<_> = states.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_content_removal_table() {
        use ResolveAction::*;
        use SuggestionKind as K;
        use SuggestionMarkKind as M;
        assert!(removes_content(K::Insert, Reject, M::Insert));
        assert!(!removes_content(K::Insert, Accept, M::Insert));
        assert!(removes_content(K::Delete, Accept, M::Delete));
        assert!(!removes_content(K::Delete, Reject, M::Delete));
        assert!(removes_content(K::Replace, Accept, M::Delete));
        assert!(!removes_content(K::Replace, Accept, M::Insert));
        assert!(removes_content(K::Replace, Reject, M::Insert));
        assert!(!removes_content(K::Replace, Reject, M::Delete));
    }

    #[test]
    fn test_resolve_finds_thread_through_its_anchor() {
        use crate::annotations::{Comment, Thread};
        use marginalia_editor_core::{MemoryDocument, TextSpan};

        let states = SuggestionStates::local();
        states.open("s1", SuggestionKind::Delete, "u1").unwrap();
        let mut doc = MemoryDocument::from_paragraphs(["the old fox"]);
        let mut binding = AnchorBinding::new();
        let span = TextSpan::new(0, 4, 8);
        binding.bind_span(&mut doc, span, &suggestion_mark_id("s1", SuggestionMarkKind::Delete));
        binding.bind_span(&mut doc, span, "s1");

        // The replicated thread carries no mark id, only its anchor ties it
        // to the suggestion.
        let mut store = AnnotationStore::new();
        let thread = Thread::new("old ", vec![Comment::new("u1", "Delete")]).with_id("s1");
        store
            .add(thread, None, None, MutationSource::Local)
            .unwrap();
        assert!(store.thread_by_mark_id("s1").is_none());

        let mut resolution = SuggestionResolution::new();
        assert!(resolution
            .resolve("s1", ResolveAction::Accept, &states, &mut store, &mut binding, &mut doc)
            .unwrap());
        assert!(store.thread("s1").is_none());
        assert_eq!(resolution.pending(), 1);

        resolution.run_deferred(&store, &mut binding, &mut doc);
        assert!(!binding.is_bound("s1"));
        assert_eq!(doc.render(), "the fox");
    }

    #[test]
    fn test_replicas_agree_on_resolution() {
        let doc_a = LoroDoc::new();
        let doc_b = LoroDoc::new();
        let a = SuggestionStates::new(&doc_a);
        let b = SuggestionStates::new(&doc_b);
        a.open("s1", SuggestionKind::Insert, "u1").unwrap();
        doc_b
            .import(&doc_a.export(loro::ExportMode::all_updates()).unwrap())
            .unwrap();
        assert_eq!(b.state("s1"), Some(SuggestionState::Open));

        assert!(b.transition("s1", ResolveAction::Reject).unwrap());
        doc_a
            .import(&doc_b.export(loro::ExportMode::all_updates()).unwrap())
            .unwrap();
        assert_eq!(a.state("s1"), Some(SuggestionState::Rejected));
    }
}
