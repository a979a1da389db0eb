//! marginalia-crdt: replicated annotations on top of Loro.
//!
//! This crate provides:
//! - `LocalPersistence`: restores a replica from its cache and keeps the cache current
//! - `ReplicaConnection`: offline-first sync of one replica with the server
//! - `AnnotationStore`: comments and threads projected from a shared list
//! - `SuggestionResolution`: accepting and rejecting suggested edits
//! - `AnnotationSession`: the editor-facing commands tying these together

pub mod annotations;
pub mod connection;
pub mod error;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod suggestion;

pub use annotations::{
    Annotation, AnnotationStore, ChangeSubscription, Comment, CommentKind, MutationSource, Thread,
    ThreadPatch, ThreadStatus, ThreadType, Tombstone,
};
pub use connection::{
    Channel, ConnectionDeps, ConnectionEvent, ConnectionStatus, ReplicaConnection,
    claim_bootstrap,
};
pub use error::CrdtError;
pub use persistence::{
    CacheStore, FileCache, LocalPersistence, MemoryCache, PersistenceOutcome,
    PersistenceRegistry, PersistenceWarning,
};
pub use registry::{ConnectionRegistry, MountedDocument};
pub use session::AnnotationSession;
pub use suggestion::{
    ResolveAction, SuggestionKind, SuggestionRecord, SuggestionResolution, SuggestionState,
    SuggestionStates,
};

pub use loro::{ExportMode, LoroDoc};
