//! Error types for replicated annotation operations.

use miette::Diagnostic;
use thiserror::Error;

use marginalia_common::{AuthError, TransportError};

/// Errors that can occur while mirroring, persisting or syncing replicas.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum CrdtError {
    /// Loro rejected an operation on a container.
    #[error("loro error: {0}")]
    #[diagnostic(code(marginalia::crdt::loro))]
    Loro(String),

    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    #[diagnostic(code(marginalia::crdt::import))]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    #[diagnostic(code(marginalia::crdt::export))]
    Export(String),

    /// The replicated structure does not have the expected shape.
    #[error("malformed replica: {0}")]
    #[diagnostic(
        code(marginalia::crdt::malformed),
        help("the cached replica may come from an older cache version")
    )]
    Malformed(String),

    /// Reading or writing the local cache failed.
    #[error("cache error: {0}")]
    #[diagnostic(code(marginalia::crdt::cache))]
    Cache(String),

    #[error(transparent)]
    #[diagnostic_source]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic_source]
    Auth(#[from] AuthError),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Loro(e.to_string())
    }
}

impl From<std::io::Error> for CrdtError {
    fn from(e: std::io::Error) -> Self {
        CrdtError::Cache(e.to_string())
    }
}
