//! Comments, threads and the patches applied to them.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Content a deleted comment keeps in place of what was written.
pub const DELETED_COMMENT_CONTENT: &str = "[Deleted Comment]";

/// Fresh random id for a comment, thread or suggestion.
pub fn new_id() -> SmolStr {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentKind {
    /// Auto-generated description of a suggested edit.
    SuggestionSummary,
}

impl CommentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuggestionSummary => "suggestionSummary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "suggestionSummary" => Some(Self::SuggestionSummary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: SmolStr,
    pub author: SmolStr,
    pub content: String,
    pub deleted: bool,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CommentKind>,
}

impl Comment {
    pub fn new(author: impl Into<SmolStr>, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            author: author.into(),
            content: content.into(),
            deleted: false,
            timestamp: now_millis(),
            kind: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SmolStr>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_kind(mut self, kind: CommentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// The soft-deleted copy of this comment. Id, author and timestamp are kept.
    pub fn tombstone(&self) -> Comment {
        Comment {
            content: DELETED_COMMENT_CONTENT.to_string(),
            deleted: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Open,
    Accepted,
    Rejected,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    Comment,
    Suggestion,
}

impl ThreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Suggestion => "suggestion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "comment" => Some(Self::Comment),
            "suggestion" => Some(Self::Suggestion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: SmolStr,
    /// Text the thread was anchored to when it was created.
    pub quote: String,
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_id: Option<SmolStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ThreadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_before_reopen: Option<ThreadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_type: Option<ThreadType>,
}

impl Thread {
    pub fn new(quote: impl Into<String>, comments: Vec<Comment>) -> Self {
        Self {
            id: new_id(),
            quote: quote.into(),
            comments,
            mark_id: None,
            status: None,
            status_before_reopen: None,
            thread_type: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SmolStr>) -> Self {
        self.id = id.into();
        self
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }
}

/// An entry of the top-level comments-or-threads list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Annotation {
    Comment(Comment),
    Thread(Thread),
}

impl Annotation {
    pub fn id(&self) -> &SmolStr {
        match self {
            Annotation::Comment(c) => &c.id,
            Annotation::Thread(t) => &t.id,
        }
    }

    pub fn as_thread(&self) -> Option<&Thread> {
        match self {
            Annotation::Thread(t) => Some(t),
            Annotation::Comment(_) => None,
        }
    }

    pub fn as_thread_mut(&mut self) -> Option<&mut Thread> {
        match self {
            Annotation::Thread(t) => Some(t),
            Annotation::Comment(_) => None,
        }
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Annotation::Comment(c) => Some(c),
            Annotation::Thread(_) => None,
        }
    }
}

impl From<Comment> for Annotation {
    fn from(c: Comment) -> Self {
        Annotation::Comment(c)
    }
}

impl From<Thread> for Annotation {
    fn from(t: Thread) -> Self {
        Annotation::Thread(t)
    }
}

/// Partial update of a thread's mutable fields. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPatch {
    pub quote: Option<String>,
    /// Replaces the content of the thread's first comment.
    pub first_comment_content: Option<String>,
    pub mark_id: Option<SmolStr>,
    pub status: Option<ThreadStatus>,
    /// `Some(None)` clears the remembered status.
    pub status_before_reopen: Option<Option<ThreadStatus>>,
    pub thread_type: Option<ThreadType>,
}

impl ThreadPatch {
    pub fn status(status: ThreadStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What a comment deletion left behind: the soft-deleted copy and where the
/// original sat in its list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub comment: Comment,
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_keeps_identity() {
        let comment = Comment::new("ada", "looks wrong").with_id("c1");
        let tomb = comment.tombstone();
        assert_eq!(tomb.id, "c1");
        assert_eq!(tomb.author, "ada");
        assert_eq!(tomb.timestamp, comment.timestamp);
        assert!(tomb.deleted);
        assert_eq!(tomb.content, DELETED_COMMENT_CONTENT);
    }

    #[test]
    fn test_status_names_parse_back() {
        for status in [
            ThreadStatus::Open,
            ThreadStatus::Accepted,
            ThreadStatus::Rejected,
            ThreadStatus::Archived,
        ] {
            assert_eq!(ThreadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ThreadStatus::parse("closed"), None);
    }

    #[test]
    fn test_new_ids_are_distinct() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }
}
