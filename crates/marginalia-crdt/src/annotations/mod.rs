//! Replicated comments and threads.

mod delta;
mod model;
mod shared;
mod store;

pub use delta::{SequenceOp, apply_sequence};
pub use model::{
    Annotation, Comment, CommentKind, DELETED_COMMENT_CONTENT, Thread, ThreadPatch, ThreadStatus,
    ThreadType, Tombstone, new_id, now_millis,
};
pub use store::{AnnotationStore, ChangeSubscription, MutationSource};
