//! The annotation store: a local projection of comments and threads,
//! optionally mirrored into a replicated Loro list.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use loro::event::{Diff, DiffEvent, ListDiffItem};
use loro::{
    ContainerID, ContainerTrait, LoroDoc, LoroList, LoroMap, LoroValue, Subscription,
    ValueOrContainer,
};
use smol_str::{SmolStr, format_smolstr};

use super::delta::{SequenceOp, apply_sequence};
use super::model::{Annotation, Comment, Thread, ThreadPatch, ThreadStatus, ThreadType, Tombstone};
use super::shared::{self, ContainerRole, Entry};
use crate::error::CrdtError;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Who a mutation comes from.
///
/// Local mutations are mirrored into the replicated list. Remote ones only
/// update the projection, since the replicated list already has them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationSource {
    Local,
    Remote,
}

type Listener = Rc<dyn Fn(&[Annotation])>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Keeps a change listener registered. Dropping it unsubscribes.
pub struct ChangeSubscription {
    listeners: Weak<RefCell<Listeners>>,
    id: u64,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .borrow_mut()
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// One committed transaction as seen by the replica subscription, captured
/// as owned data.
#[derive(Debug)]
struct ReplicaBatch {
    origin: String,
    changes: Vec<ReplicaChange>,
}

#[derive(Debug)]
enum ReplicaChange {
    Sequence {
        target: ContainerID,
        ops: Vec<SequenceOp<Entry<Annotation>>>,
    },
    Fields {
        target: ContainerID,
        updates: Vec<(String, Option<LoroValue>)>,
    },
}

impl ReplicaBatch {
    fn capture(event: &DiffEvent<'_>) -> Self {
        let mut changes = Vec::with_capacity(event.events.len());
        for container in &event.events {
            let target = container.target.clone();
            match &container.diff {
                Diff::List(items) => {
                    let ops = items
                        .iter()
                        .map(|item| match item {
                            ListDiffItem::Insert { insert, .. } => SequenceOp::Insert(
                                insert.iter().filter_map(shared::read_annotation).collect(),
                            ),
                            ListDiffItem::Delete { delete } => SequenceOp::Delete(*delete),
                            ListDiffItem::Retain { retain } => SequenceOp::Retain(*retain),
                        })
                        .collect();
                    changes.push(ReplicaChange::Sequence { target, ops });
                }
                Diff::Map(delta) => {
                    let updates = delta
                        .updated
                        .iter()
                        .map(|(key, value)| {
                            let value = match value {
                                Some(ValueOrContainer::Value(v)) => Some(v.clone()),
                                _ => None,
                            };
                            (key.to_string(), value)
                        })
                        .collect();
                    changes.push(ReplicaChange::Fields { target, updates });
                }
                _ => {}
            }
        }
        Self {
            origin: event.origin.to_string(),
            changes,
        }
    }
}

type Inbox = Arc<Mutex<VecDeque<ReplicaBatch>>>;

struct Replica {
    doc: LoroDoc,
    list: LoroList,
    /// Commit origin for this store's own writes.
    origin: SmolStr,
    inbox: Inbox,
    containers: HashMap<ContainerID, ContainerRole>,
    _subscription: Subscription,
}

impl Replica {
    fn commit(&self) {
        self.doc.set_next_commit_origin(&self.origin);
        self.doc.commit();
    }

    fn register(&mut self, containers: Vec<(ContainerID, ContainerRole)>) {
        self.containers.extend(containers);
    }

    fn take_inbox(&self) -> VecDeque<ReplicaBatch> {
        std::mem::take(&mut *self.inbox.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Remove every entry whose id already appears earlier in the same
    /// list, top-level and inside threads. Concurrent writers can each
    /// insert the same id; keeping the lowest position makes every replica
    /// drop the same copies. Returns how many entries were removed.
    fn dedupe(&mut self) -> Result<usize, CrdtError> {
        let root = self.list.clone();
        let mut removed = self.drop_duplicates(&root)?;
        for i in 0..root.len() {
            let comments = root
                .get(i)
                .and_then(|v| shared::entry_map(&v))
                .as_ref()
                .and_then(shared::comments_of);
            if let Some(comments) = comments {
                removed += self.drop_duplicates(&comments)?;
            }
        }
        if removed > 0 {
            self.commit();
        }
        Ok(removed)
    }

    fn drop_duplicates(&mut self, list: &LoroList) -> Result<usize, CrdtError> {
        let duplicates = shared::duplicate_entries(list);
        for (pos, map) in duplicates.iter().rev() {
            self.forget(map);
            list.delete(*pos, 1)?;
        }
        Ok(duplicates.len())
    }

    fn forget(&mut self, map: &LoroMap) {
        self.containers.remove(&map.id());
        if let Some(comments) = shared::comments_of(map) {
            self.containers.remove(&comments.id());
        }
    }

    fn mirror_add(
        &mut self,
        item: &Annotation,
        parent_thread: Option<&str>,
        offset: Option<usize>,
    ) -> Result<(), CrdtError> {
        let written = match (parent_thread, item) {
            (None, _) => {
                if shared::position_of(&self.list, item.id()).is_some() {
                    return Ok(());
                }
                let at = offset.unwrap_or(self.list.len()).min(self.list.len());
                shared::write_annotation(&self.list, at, item)?
            }
            (Some(thread_id), Annotation::Comment(comment)) => {
                let Some(comments) = shared::map_of(&self.list, thread_id)
                    .as_ref()
                    .and_then(shared::comments_of)
                else {
                    tracing::warn!(%thread_id, "thread missing from replica, comment not mirrored");
                    return Ok(());
                };
                if shared::position_of(&comments, &comment.id).is_some() {
                    return Ok(());
                }
                let at = offset.unwrap_or(comments.len()).min(comments.len());
                shared::write_comment(&comments, at, comment)?
            }
            (Some(_), Annotation::Thread(_)) => return Ok(()),
        };
        self.register(written);
        self.commit();
        Ok(())
    }

    fn mirror_delete(
        &mut self,
        id: &str,
        parent_thread: Option<&str>,
        remove_thread: bool,
    ) -> Result<(), CrdtError> {
        match parent_thread {
            None => {
                if let Some(pos) = shared::position_of(&self.list, id) {
                    self.list.delete(pos, 1)?;
                }
            }
            Some(thread_id) => {
                let comments = shared::map_of(&self.list, thread_id)
                    .as_ref()
                    .and_then(shared::comments_of);
                if let Some(comments) = comments {
                    if let Some(pos) = shared::position_of(&comments, id) {
                        comments.delete(pos, 1)?;
                    }
                }
                if remove_thread {
                    if let Some(pos) = shared::position_of(&self.list, thread_id) {
                        self.list.delete(pos, 1)?;
                    }
                }
            }
        }
        self.commit();
        Ok(())
    }

    fn mirror_update(&mut self, id: &str, patch: &ThreadPatch) -> Result<(), CrdtError> {
        let Some(map) = shared::map_of(&self.list, id) else {
            tracing::warn!(%id, "thread missing from replica, update not mirrored");
            return Ok(());
        };
        if let Some(quote) = &patch.quote {
            map.insert(shared::KEY_QUOTE, quote.as_str())?;
        }
        if let Some(content) = &patch.first_comment_content {
            let first = shared::comments_of(&map)
                .and_then(|list| list.get(0))
                .and_then(|v| shared::entry_map(&v));
            if let Some(first) = first {
                first.insert(shared::KEY_CONTENT, content.as_str())?;
            }
        }
        if let Some(mark_id) = &patch.mark_id {
            map.insert(shared::KEY_MARK_ID, mark_id.as_str())?;
        }
        if let Some(status) = patch.status {
            map.insert(shared::KEY_STATUS, status.as_str())?;
        }
        match patch.status_before_reopen {
            Some(Some(status)) => map.insert(shared::KEY_STATUS_BEFORE_REOPEN, status.as_str())?,
            Some(None) => map.delete(shared::KEY_STATUS_BEFORE_REOPEN)?,
            None => {}
        }
        if let Some(thread_type) = patch.thread_type {
            map.insert(shared::KEY_THREAD_TYPE, thread_type.as_str())?;
        }
        self.commit();
        Ok(())
    }
}

/// Ordered comments and threads, kept in step with a replicated list when
/// attached to one.
///
/// The projection is only ever a cache of the replicated list: detaching and
/// re-attaching rebuilds it. Without a replica the store is purely local and
/// behaves the same way.
#[derive(Default)]
pub struct AnnotationStore {
    annotations: Vec<Annotation>,
    replica: Option<Replica>,
    listeners: Rc<RefCell<Listeners>>,
    synced: bool,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn is_collaborative(&self) -> bool {
        self.replica.is_some()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.annotations
            .iter()
            .filter_map(Annotation::as_thread)
            .find(|t| t.id == id)
    }

    pub fn thread_by_mark_id(&self, mark_id: &str) -> Option<&Thread> {
        self.annotations
            .iter()
            .filter_map(Annotation::as_thread)
            .find(|t| t.mark_id.as_deref() == Some(mark_id))
    }

    pub fn threads_by_type(&self, thread_type: ThreadType) -> Vec<&Thread> {
        self.annotations
            .iter()
            .filter_map(Annotation::as_thread)
            .filter(|t| t.thread_type == Some(thread_type))
            .collect()
    }

    /// Register a listener called with the whole projection after every
    /// logical change.
    pub fn on_change(&self, listener: impl Fn(&[Annotation]) + 'static) -> ChangeSubscription {
        let mut listeners = self.listeners.borrow_mut();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Rc::new(listener)));
        ChangeSubscription {
            listeners: Rc::downgrade(&self.listeners),
            id,
        }
    }

    /// Bind to the `comments` list of `doc`.
    ///
    /// Entries that only exist locally are appended to the replica, then the
    /// projection is rebuilt from it.
    pub fn attach(&mut self, doc: &LoroDoc) -> Result<(), CrdtError> {
        let list = doc.get_list(shared::ROOT_LIST);
        let origin = format_smolstr!("annotations-{}", NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed));
        let inbox: Inbox = Arc::default();
        let subscription = {
            let inbox = inbox.clone();
            doc.subscribe_root(Arc::new(move |event: DiffEvent<'_>| {
                let batch = ReplicaBatch::capture(&event);
                inbox
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(batch);
            }))
        };
        let mut replica = Replica {
            doc: doc.clone(),
            list,
            origin,
            inbox,
            containers: HashMap::new(),
            _subscription: subscription,
        };

        let mut carried = 0usize;
        for item in &self.annotations {
            if shared::position_of(&replica.list, item.id()).is_none() {
                shared::write_annotation(&replica.list, replica.list.len(), item)?;
                carried += 1;
            }
        }
        if carried > 0 {
            replica.commit();
        }

        self.annotations.clear();
        for entry in shared::read_list(&replica.list) {
            replica.register(entry.containers);
            self.annotations.push(entry.item);
        }
        // Everything queued so far is already part of what was just read.
        replica.take_inbox();
        tracing::debug!(
            origin = %replica.origin,
            carried,
            entries = self.annotations.len(),
            "annotation store attached"
        );
        self.replica = Some(replica);
        self.notify();
        Ok(())
    }

    /// Stop following the replica. The projection is kept as local state.
    pub fn detach(&mut self) {
        if let Some(replica) = self.replica.take() {
            tracing::debug!(origin = %replica.origin, "annotation store detached");
        }
    }

    /// Insert a comment or thread.
    ///
    /// With `parent_thread` the item must be a comment and goes into that
    /// thread. `offset` defaults to the end. Adding an id that is already
    /// present is a no-op. Returns whether the projection changed.
    pub fn add(
        &mut self,
        item: impl Into<Annotation>,
        parent_thread: Option<&str>,
        offset: Option<usize>,
        source: MutationSource,
    ) -> Result<bool, CrdtError> {
        let item = item.into();
        let changed = match (parent_thread, &item) {
            (None, _) => {
                if self.annotations.iter().any(|a| a.id() == item.id()) {
                    false
                } else {
                    let at = offset
                        .unwrap_or(self.annotations.len())
                        .min(self.annotations.len());
                    self.annotations.insert(at, item.clone());
                    true
                }
            }
            (Some(thread_id), Annotation::Comment(comment)) => {
                let Some(thread) = find_thread_mut(&mut self.annotations, thread_id) else {
                    tracing::debug!(%thread_id, "add to unknown thread ignored");
                    return Ok(false);
                };
                if thread.comment(&comment.id).is_some() {
                    false
                } else {
                    let at = offset
                        .unwrap_or(thread.comments.len())
                        .min(thread.comments.len());
                    thread.comments.insert(at, comment.clone());
                    true
                }
            }
            (Some(_), Annotation::Thread(thread)) => {
                return Err(CrdtError::Malformed(format!(
                    "thread {} cannot be nested in another thread",
                    thread.id
                )));
            }
        };

        if source == MutationSource::Local {
            if let Some(replica) = self.replica.as_mut() {
                replica.mirror_add(&item, parent_thread, offset)?;
            }
        }
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Remove a comment or thread.
    ///
    /// Deleting a comment returns its tombstone and former index so callers
    /// can put a soft-deleted copy back. Deleting the last comment of a
    /// thread locally removes the thread too.
    pub fn delete(
        &mut self,
        id: &str,
        parent_thread: Option<&str>,
        source: MutationSource,
    ) -> Result<Option<Tombstone>, CrdtError> {
        let mut remove_thread = false;
        let tombstone = match parent_thread {
            Some(thread_id) => {
                let Some(ti) = thread_position(&self.annotations, thread_id) else {
                    return Ok(None);
                };
                let Annotation::Thread(thread) = &mut self.annotations[ti] else {
                    return Ok(None);
                };
                let Some(ci) = thread.comments.iter().position(|c| c.id == id) else {
                    return Ok(None);
                };
                let comment = thread.comments.remove(ci);
                if thread.comments.is_empty() && source == MutationSource::Local {
                    self.annotations.remove(ti);
                    remove_thread = true;
                }
                Some(Tombstone {
                    comment: comment.tombstone(),
                    index: ci,
                })
            }
            None => {
                let Some(i) = self.annotations.iter().position(|a| a.id() == id) else {
                    return Ok(None);
                };
                match self.annotations.remove(i) {
                    Annotation::Comment(comment) => Some(Tombstone {
                        comment: comment.tombstone(),
                        index: i,
                    }),
                    Annotation::Thread(_) => None,
                }
            }
        };

        if source == MutationSource::Local {
            if let Some(replica) = self.replica.as_mut() {
                replica.mirror_delete(id, parent_thread, remove_thread)?;
            }
        }
        self.notify();
        Ok(tombstone)
    }

    /// Apply a partial update to a thread. Returns `false` if no such thread.
    pub fn update_thread(
        &mut self,
        id: &str,
        patch: ThreadPatch,
        source: MutationSource,
    ) -> Result<bool, CrdtError> {
        {
            let Some(thread) = find_thread_mut(&mut self.annotations, id) else {
                return Ok(false);
            };
            if let Some(quote) = &patch.quote {
                thread.quote.clone_from(quote);
            }
            if let Some(content) = &patch.first_comment_content {
                if let Some(first) = thread.comments.first_mut() {
                    first.content.clone_from(content);
                }
            }
            if let Some(mark_id) = &patch.mark_id {
                thread.mark_id = Some(mark_id.clone());
            }
            if let Some(status) = patch.status {
                thread.status = Some(status);
            }
            if let Some(before) = patch.status_before_reopen {
                thread.status_before_reopen = before;
            }
            if let Some(thread_type) = patch.thread_type {
                thread.thread_type = Some(thread_type);
            }
        }

        if source == MutationSource::Local {
            if let Some(replica) = self.replica.as_mut() {
                replica.mirror_update(id, &patch)?;
            }
        }
        self.notify();
        Ok(true)
    }

    /// Replay changes other writers made to the replica since the last poll.
    ///
    /// Batches this store committed itself are dropped. Listeners fire once
    /// per batch that changed the projection. Returns how many batches did.
    pub fn poll_remote(&mut self) -> usize {
        let Self {
            annotations,
            replica,
            listeners,
            ..
        } = self;
        let Some(replica) = replica.as_mut() else {
            return 0;
        };
        let root = replica.list.id();
        let mut applied = 0;
        for batch in replica.take_inbox() {
            if batch.origin == replica.origin {
                continue;
            }
            if apply_batch(annotations, &mut replica.containers, &root, batch) {
                applied += 1;
                notify_listeners(listeners, annotations);
            }
        }
        if applied > 0 {
            tracing::trace!(applied, "replayed remote annotation batches");
            match replica.dedupe() {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::debug!(removed, "dropped duplicate annotation entries");
                    dedupe_projection(annotations);
                    notify_listeners(listeners, annotations);
                }
                Err(error) => tracing::warn!(%error, "failed to drop duplicate annotation entries"),
            }
        }
        applied
    }

    fn notify(&self) {
        notify_listeners(&self.listeners, &self.annotations);
    }
}

fn notify_listeners(listeners: &RefCell<Listeners>, annotations: &[Annotation]) {
    let current: Vec<Listener> = listeners
        .borrow()
        .entries
        .iter()
        .map(|(_, l)| l.clone())
        .collect();
    for listener in current {
        listener(annotations);
    }
}

/// Keep the first annotation per id, and the first comment per id inside
/// each thread.
fn dedupe_projection(annotations: &mut Vec<Annotation>) {
    let mut seen = HashSet::new();
    annotations.retain(|a| seen.insert(a.id().clone()));
    for thread in annotations.iter_mut().filter_map(Annotation::as_thread_mut) {
        let mut seen = HashSet::new();
        thread.comments.retain(|c| seen.insert(c.id.clone()));
    }
}

fn thread_position(annotations: &[Annotation], id: &str) -> Option<usize> {
    annotations
        .iter()
        .position(|a| matches!(a, Annotation::Thread(t) if t.id == id))
}

fn find_thread_mut<'a>(annotations: &'a mut [Annotation], id: &str) -> Option<&'a mut Thread> {
    annotations
        .iter_mut()
        .filter_map(Annotation::as_thread_mut)
        .find(|t| t.id == id)
}

fn find_comment_mut<'a>(annotations: &'a mut [Annotation], id: &str) -> Option<&'a mut Comment> {
    annotations.iter_mut().find_map(|a| match a {
        Annotation::Comment(c) if c.id == id => Some(c),
        Annotation::Comment(_) => None,
        Annotation::Thread(t) => t.comments.iter_mut().find(|c| c.id == id),
    })
}

/// Register an inserted run's containers and keep the items `pick` accepts.
fn adopt<T>(
    op: SequenceOp<Entry<Annotation>>,
    containers: &mut HashMap<ContainerID, ContainerRole>,
    fresh: &mut HashSet<ContainerID>,
    pick: fn(Annotation) -> Option<T>,
) -> SequenceOp<T> {
    match op {
        SequenceOp::Retain(n) => SequenceOp::Retain(n),
        SequenceOp::Delete(n) => SequenceOp::Delete(n),
        SequenceOp::Insert(entries) => {
            let mut items = Vec::with_capacity(entries.len());
            for entry in entries {
                let Some(item) = pick(entry.item) else {
                    continue;
                };
                for (id, role) in entry.containers {
                    fresh.insert(id.clone());
                    containers.insert(id, role);
                }
                items.push(item);
            }
            SequenceOp::Insert(items)
        }
    }
}

fn apply_batch(
    annotations: &mut Vec<Annotation>,
    containers: &mut HashMap<ContainerID, ContainerRole>,
    root: &ContainerID,
    batch: ReplicaBatch,
) -> bool {
    // Containers inserted by this batch were decoded whole when it was
    // captured, so their own diffs in the same batch are already applied.
    let mut fresh = HashSet::new();
    let mut changed = false;
    let mut removed = false;

    for change in batch.changes {
        match change {
            ReplicaChange::Sequence { target, ops } => {
                if fresh.contains(&target) {
                    continue;
                }
                removed |= ops.iter().any(|op| matches!(op, SequenceOp::Delete(_)));
                if target == *root {
                    let ops: Vec<_> = ops
                        .into_iter()
                        .map(|op| adopt(op, containers, &mut fresh, Some))
                        .collect();
                    changed |= apply_sequence(annotations, ops);
                } else if let Some(ContainerRole::ThreadComments(thread_id)) =
                    containers.get(&target).cloned()
                {
                    let ops: Vec<_> = ops
                        .into_iter()
                        .map(|op| {
                            adopt(op, containers, &mut fresh, |a| match a {
                                Annotation::Comment(c) => Some(c),
                                Annotation::Thread(_) => None,
                            })
                        })
                        .collect();
                    let Some(thread) = find_thread_mut(annotations, &thread_id) else {
                        tracing::debug!(%thread_id, "comment list delta for unknown thread");
                        continue;
                    };
                    changed |= apply_sequence(&mut thread.comments, ops);
                } else {
                    tracing::trace!(?target, "sequence delta for unknown container");
                }
            }
            ReplicaChange::Fields { target, updates } => {
                if fresh.contains(&target) {
                    continue;
                }
                match containers.get(&target) {
                    Some(ContainerRole::Thread(thread_id)) => {
                        let Some(thread) = find_thread_mut(annotations, thread_id) else {
                            continue;
                        };
                        for (key, value) in &updates {
                            changed |= set_thread_field(thread, key, value.as_ref());
                        }
                    }
                    Some(ContainerRole::Comment(comment_id)) => {
                        let Some(comment) = find_comment_mut(annotations, comment_id) else {
                            continue;
                        };
                        for (key, value) in &updates {
                            changed |= set_comment_field(comment, key, value.as_ref());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if removed {
        prune_containers(annotations, containers);
    }
    changed
}

fn set_thread_field(thread: &mut Thread, key: &str, value: Option<&LoroValue>) -> bool {
    if !shared::THREAD_FIELDS.contains(&key) {
        return false;
    }
    let text = value.and_then(shared::value_str);
    let status = || text.as_deref().and_then(ThreadStatus::parse);
    match key {
        shared::KEY_QUOTE => thread.quote = text.clone().unwrap_or_default(),
        shared::KEY_STATUS => thread.status = status(),
        shared::KEY_STATUS_BEFORE_REOPEN => thread.status_before_reopen = status(),
        shared::KEY_MARK_ID => thread.mark_id = text.as_deref().map(SmolStr::new),
        shared::KEY_THREAD_TYPE => {
            thread.thread_type = text.as_deref().and_then(ThreadType::parse);
        }
        _ => return false,
    }
    true
}

fn set_comment_field(comment: &mut Comment, key: &str, value: Option<&LoroValue>) -> bool {
    if !shared::COMMENT_FIELDS.contains(&key) {
        return false;
    }
    match key {
        shared::KEY_CONTENT => {
            comment.content = value.and_then(shared::value_str).unwrap_or_default();
        }
        shared::KEY_DELETED => {
            comment.deleted = value.and_then(shared::value_bool).unwrap_or(false);
        }
        _ => return false,
    }
    true
}

/// Forget containers whose thread or comment is gone.
fn prune_containers(
    annotations: &[Annotation],
    containers: &mut HashMap<ContainerID, ContainerRole>,
) {
    let mut live: HashSet<&str> = HashSet::new();
    for annotation in annotations {
        live.insert(annotation.id());
        if let Annotation::Thread(t) = annotation {
            live.extend(t.comments.iter().map(|c| c.id.as_str()));
        }
    }
    containers.retain(|_, role| match role {
        ContainerRole::Thread(id) | ContainerRole::ThreadComments(id) | ContainerRole::Comment(id) => {
            live.contains(id.as_str())
        }
    });
}
