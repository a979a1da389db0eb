//! Layout of annotations inside the replicated document.
//!
//! Root list `comments` holds one map per entry. A thread map carries a nested
//! `comments` list of comment maps.

use loro::{
    Container, ContainerID, ContainerTrait, LoroList, LoroMap, LoroValue, ValueOrContainer,
};
use smol_str::SmolStr;

use super::model::{Annotation, Comment, CommentKind, Thread, ThreadStatus, ThreadType};
use crate::error::CrdtError;

pub(crate) const ROOT_LIST: &str = "comments";

pub(crate) const KEY_TYPE: &str = "type";
pub(crate) const KEY_ID: &str = "id";
pub(crate) const KEY_AUTHOR: &str = "author";
pub(crate) const KEY_CONTENT: &str = "content";
pub(crate) const KEY_DELETED: &str = "deleted";
pub(crate) const KEY_TIMESTAMP: &str = "timestamp";
pub(crate) const KEY_COMMENT_KIND: &str = "commentKind";
pub(crate) const KEY_QUOTE: &str = "quote";
pub(crate) const KEY_MARK_ID: &str = "markId";
pub(crate) const KEY_STATUS: &str = "status";
pub(crate) const KEY_STATUS_BEFORE_REOPEN: &str = "statusBeforeReopen";
pub(crate) const KEY_THREAD_TYPE: &str = "threadType";
pub(crate) const KEY_COMMENTS: &str = "comments";

/// Thread fields a remote field update may touch.
pub(crate) const THREAD_FIELDS: [&str; 5] = [
    KEY_QUOTE,
    KEY_STATUS,
    KEY_STATUS_BEFORE_REOPEN,
    KEY_MARK_ID,
    KEY_THREAD_TYPE,
];

/// Comment fields a remote field update may touch.
pub(crate) const COMMENT_FIELDS: [&str; 2] = [KEY_CONTENT, KEY_DELETED];

/// What a nested container stands for in the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ContainerRole {
    /// A thread's map.
    Thread(SmolStr),
    /// A thread's nested comment list.
    ThreadComments(SmolStr),
    /// A comment's map, top-level or nested.
    Comment(SmolStr),
}

/// A decoded list entry plus the containers it is made of.
#[derive(Debug, Clone)]
pub(crate) struct Entry<T> {
    pub item: T,
    pub containers: Vec<(ContainerID, ContainerRole)>,
}

pub(crate) fn write_annotation(
    list: &LoroList,
    pos: usize,
    item: &Annotation,
) -> Result<Vec<(ContainerID, ContainerRole)>, CrdtError> {
    let map = list.insert_container(pos, LoroMap::new())?;
    match item {
        Annotation::Comment(c) => {
            fill_comment(&map, c)?;
            Ok(vec![(map.id(), ContainerRole::Comment(c.id.clone()))])
        }
        Annotation::Thread(t) => fill_thread(&map, t),
    }
}

pub(crate) fn write_comment(
    list: &LoroList,
    pos: usize,
    comment: &Comment,
) -> Result<Vec<(ContainerID, ContainerRole)>, CrdtError> {
    let map = list.insert_container(pos, LoroMap::new())?;
    fill_comment(&map, comment)?;
    Ok(vec![(map.id(), ContainerRole::Comment(comment.id.clone()))])
}

fn fill_comment(map: &LoroMap, c: &Comment) -> Result<(), CrdtError> {
    map.insert(KEY_TYPE, "comment")?;
    map.insert(KEY_ID, c.id.as_str())?;
    map.insert(KEY_AUTHOR, c.author.as_str())?;
    map.insert(KEY_CONTENT, c.content.as_str())?;
    map.insert(KEY_DELETED, c.deleted)?;
    map.insert(KEY_TIMESTAMP, c.timestamp)?;
    if let Some(kind) = c.kind {
        map.insert(KEY_COMMENT_KIND, kind.as_str())?;
    }
    Ok(())
}

fn fill_thread(map: &LoroMap, t: &Thread) -> Result<Vec<(ContainerID, ContainerRole)>, CrdtError> {
    map.insert(KEY_TYPE, "thread")?;
    map.insert(KEY_ID, t.id.as_str())?;
    map.insert(KEY_QUOTE, t.quote.as_str())?;
    if let Some(mark_id) = &t.mark_id {
        map.insert(KEY_MARK_ID, mark_id.as_str())?;
    }
    if let Some(status) = t.status {
        map.insert(KEY_STATUS, status.as_str())?;
    }
    if let Some(status) = t.status_before_reopen {
        map.insert(KEY_STATUS_BEFORE_REOPEN, status.as_str())?;
    }
    if let Some(thread_type) = t.thread_type {
        map.insert(KEY_THREAD_TYPE, thread_type.as_str())?;
    }
    let comments = map.insert_container(KEY_COMMENTS, LoroList::new())?;
    let mut containers = vec![
        (map.id(), ContainerRole::Thread(t.id.clone())),
        (comments.id(), ContainerRole::ThreadComments(t.id.clone())),
    ];
    for (i, c) in t.comments.iter().enumerate() {
        containers.extend(write_comment(&comments, i, c)?);
    }
    Ok(containers)
}

/// Index of the entry whose `id` is `id`.
pub(crate) fn position_of(list: &LoroList, id: &str) -> Option<usize> {
    (0..list.len()).find(|&i| {
        list.get(i)
            .and_then(|v| entry_map(&v))
            .and_then(|m| get_str(&m, KEY_ID))
            .is_some_and(|entry_id| entry_id == id)
    })
}

/// Entries whose `id` already appeared at a lower position, in list order.
pub(crate) fn duplicate_entries(list: &LoroList) -> Vec<(usize, LoroMap)> {
    let mut seen = std::collections::HashSet::new();
    let mut duplicates = Vec::new();
    for i in 0..list.len() {
        let Some(map) = list.get(i).and_then(|v| entry_map(&v)) else {
            continue;
        };
        let Some(id) = get_str(&map, KEY_ID) else {
            continue;
        };
        if !seen.insert(id) {
            duplicates.push((i, map));
        }
    }
    duplicates
}

/// The map at `id`'s position.
pub(crate) fn map_of(list: &LoroList, id: &str) -> Option<LoroMap> {
    let pos = position_of(list, id)?;
    list.get(pos).and_then(|v| entry_map(&v))
}

/// A thread map's nested comment list.
pub(crate) fn comments_of(thread: &LoroMap) -> Option<LoroList> {
    match thread.get(KEY_COMMENTS)? {
        ValueOrContainer::Container(Container::List(list)) => Some(list),
        _ => None,
    }
}

pub(crate) fn entry_map(v: &ValueOrContainer) -> Option<LoroMap> {
    match v {
        ValueOrContainer::Container(Container::Map(map)) => Some(map.clone()),
        _ => None,
    }
}

/// Decode every entry of a top-level list.
pub(crate) fn read_list(list: &LoroList) -> Vec<Entry<Annotation>> {
    (0..list.len())
        .filter_map(|i| list.get(i))
        .filter_map(|v| read_annotation(&v))
        .collect()
}

/// Decode one top-level entry. Returns `None` for anything that is not a
/// comment or thread map.
pub(crate) fn read_annotation(v: &ValueOrContainer) -> Option<Entry<Annotation>> {
    let map = entry_map(v)?;
    match get_str(&map, KEY_TYPE).as_deref() {
        Some("thread") => read_thread(&map).map(|e| Entry {
            item: Annotation::Thread(e.item),
            containers: e.containers,
        }),
        Some("comment") => read_comment_map(&map).map(|e| Entry {
            item: Annotation::Comment(e.item),
            containers: e.containers,
        }),
        other => {
            tracing::debug!(?other, "skipping unknown annotation entry");
            None
        }
    }
}

/// Decode one entry of a thread's nested comment list.
pub(crate) fn read_comment(v: &ValueOrContainer) -> Option<Entry<Comment>> {
    read_comment_map(&entry_map(v)?)
}

fn read_comment_map(map: &LoroMap) -> Option<Entry<Comment>> {
    let id = SmolStr::new(get_str(map, KEY_ID)?);
    let comment = Comment {
        id: id.clone(),
        author: get_str(map, KEY_AUTHOR).map(SmolStr::new).unwrap_or_default(),
        content: get_str(map, KEY_CONTENT).unwrap_or_default(),
        deleted: get_bool(map, KEY_DELETED).unwrap_or(false),
        timestamp: get_timestamp(map, KEY_TIMESTAMP).unwrap_or(0),
        kind: get_str(map, KEY_COMMENT_KIND).and_then(|k| CommentKind::parse(&k)),
    };
    Some(Entry {
        item: comment,
        containers: vec![(map.id(), ContainerRole::Comment(id))],
    })
}

fn read_thread(map: &LoroMap) -> Option<Entry<Thread>> {
    let id = SmolStr::new(get_str(map, KEY_ID)?);
    let mut containers = vec![(map.id(), ContainerRole::Thread(id.clone()))];
    let mut comments = Vec::new();
    if let Some(list) = comments_of(map) {
        containers.push((list.id(), ContainerRole::ThreadComments(id.clone())));
        for i in 0..list.len() {
            let Some(entry) = list.get(i).and_then(|v| read_comment(&v)) else {
                continue;
            };
            comments.push(entry.item);
            containers.extend(entry.containers);
        }
    }
    let thread = Thread {
        id,
        quote: get_str(map, KEY_QUOTE).unwrap_or_default(),
        comments,
        mark_id: get_str(map, KEY_MARK_ID).map(SmolStr::new),
        status: get_str(map, KEY_STATUS).and_then(|s| ThreadStatus::parse(&s)),
        status_before_reopen: get_str(map, KEY_STATUS_BEFORE_REOPEN)
            .and_then(|s| ThreadStatus::parse(&s)),
        thread_type: get_str(map, KEY_THREAD_TYPE).and_then(|s| ThreadType::parse(&s)),
    };
    Some(Entry {
        item: thread,
        containers,
    })
}

fn get_value(map: &LoroMap, key: &str) -> Option<LoroValue> {
    match map.get(key)? {
        ValueOrContainer::Value(v) => Some(v),
        ValueOrContainer::Container(_) => None,
    }
}

pub(crate) fn get_str(map: &LoroMap, key: &str) -> Option<String> {
    get_value(map, key).as_ref().and_then(value_str)
}

fn get_bool(map: &LoroMap, key: &str) -> Option<bool> {
    get_value(map, key).as_ref().and_then(value_bool)
}

fn get_timestamp(map: &LoroMap, key: &str) -> Option<i64> {
    let v = get_value(map, key)?;
    v.as_i64()
        .copied()
        .or_else(|| v.as_double().map(|d| *d as i64))
}

pub(crate) fn value_str(v: &LoroValue) -> Option<String> {
    v.as_string().map(|s| s.to_string())
}

pub(crate) fn value_bool(v: &LoroValue) -> Option<bool> {
    v.as_bool().copied()
}

#[cfg(test)]
mod tests {
    use loro::LoroDoc;

    use super::*;

    #[test]
    fn test_thread_layout_reads_back() {
        let doc = LoroDoc::new();
        let list = doc.get_list(ROOT_LIST);
        let mut thread = Thread::new(
            "quoted",
            vec![
                Comment::new("ada", "first").with_id("c1"),
                Comment::new("bo", "second")
                    .with_id("c2")
                    .with_kind(CommentKind::SuggestionSummary),
            ],
        )
        .with_id("t1");
        thread.status = Some(ThreadStatus::Open);
        thread.thread_type = Some(ThreadType::Suggestion);

        let containers = write_annotation(&list, 0, &Annotation::Thread(thread.clone())).unwrap();
        doc.commit();

        // thread map, nested list, two comment maps
        assert_eq!(containers.len(), 4);
        assert_eq!(position_of(&list, "t1"), Some(0));
        assert_eq!(position_of(&list, "c1"), None);

        let entries = read_list(&list);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item, Annotation::Thread(thread));
        assert_eq!(entries[0].containers, containers);
    }

    #[test]
    fn test_foreign_entries_are_skipped() {
        let doc = LoroDoc::new();
        let list = doc.get_list(ROOT_LIST);
        list.insert(0, "not a map").unwrap();
        let stray = list.insert_container(1, LoroMap::new()).unwrap();
        stray.insert(KEY_TYPE, "widget").unwrap();
        write_annotation(&list, 2, &Annotation::Comment(Comment::new("ada", "hi"))).unwrap();
        doc.commit();

        let entries = read_list(&list);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].item.as_comment().is_some());
    }
}
