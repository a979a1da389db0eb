//! Mark id conventions.
//!
//! Comment threads and suggestion threads are anchored by their plain id.
//! Suggested content is additionally tagged `suggestion:<id>:<insert|delete>`.

use smol_str::{SmolStr, format_smolstr};

pub const SUGGESTION_ID_PREFIX: &str = "suggestion:";

/// Which side of a suggestion a content mark covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SuggestionMarkKind {
    Insert,
    Delete,
}

impl SuggestionMarkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

/// A classified anchor id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkId<'a> {
    /// Plain thread anchor (comment or suggestion thread).
    Thread(&'a str),
    /// Suggested content.
    Suggestion {
        id: &'a str,
        kind: SuggestionMarkKind,
    },
}

impl<'a> MarkId<'a> {
    /// Classify a raw mark id. A suggestion mark with a missing or unknown
    /// kind counts as an insert.
    pub fn parse(raw: &'a str) -> MarkId<'a> {
        let Some(rest) = raw.strip_prefix(SUGGESTION_ID_PREFIX) else {
            return MarkId::Thread(raw);
        };
        let (id, kind) = rest.split_once(':').unwrap_or((rest, ""));
        if id.is_empty() {
            return MarkId::Thread(raw);
        }
        let kind = match kind {
            "delete" => SuggestionMarkKind::Delete,
            _ => SuggestionMarkKind::Insert,
        };
        MarkId::Suggestion { id, kind }
    }

    pub fn is_suggestion(&self) -> bool {
        matches!(self, MarkId::Suggestion { .. })
    }
}

/// Build the content mark id for a suggestion.
pub fn suggestion_mark_id(id: &str, kind: SuggestionMarkKind) -> SmolStr {
    format_smolstr!("{SUGGESTION_ID_PREFIX}{id}:{}", kind.as_str())
}
