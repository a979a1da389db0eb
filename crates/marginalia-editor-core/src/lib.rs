//! marginalia-editor-core: keeps annotations attached to the right spans of a
//! document while it is edited.
//!
//! This crate provides:
//! - `AnchorDocument` / `AnchorNode`: what the annotation layer needs from an editing engine
//! - `AnchorBinding`: id <-> node index that survives splits, merges and deletions
//! - `MemoryDocument`: a small block document implementing `AnchorDocument`
//! - mark id conventions for comment threads and suggestions

pub mod binding;
pub mod document;
pub mod marks;
pub mod memory;
pub mod types;

pub use binding::AnchorBinding;
pub use document::{AnchorDocument, AnchorNode};
pub use marks::{MarkId, SUGGESTION_ID_PREFIX, SuggestionMarkKind, suggestion_mark_id};
pub use memory::{AnchorRun, MemoryDocument};
pub use smol_str::SmolStr;
pub use types::{IdSet, MutationBatch, NodeKey, NodeMutation, TextSpan};
