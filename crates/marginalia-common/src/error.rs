//! Error types shared across marginalia crates.

use miette::Diagnostic;

/// Main error type for marginalia plumbing.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum MarginaliaError {
    /// Configuration could not be loaded or saved
    #[error(transparent)]
    #[diagnostic_source]
    Config(#[from] ConfigError),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error(transparent)]
    #[diagnostic_source]
    Serde(#[from] SerDeError),

    /// Transport error
    #[error(transparent)]
    #[diagnostic_source]
    Transport(#[from] TransportError),

    /// Credential fetch or server authentication failed
    #[error(transparent)]
    #[diagnostic_source]
    Auth(#[from] AuthError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(marginalia::serde::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(marginalia::serde::toml_read))]
    TomlRead(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(code(marginalia::serde::toml_write))]
    TomlWrite(#[from] toml::ser::Error),

    #[error(transparent)]
    #[diagnostic(code(marginalia::serde::postcard))]
    Postcard(#[from] postcard::Error),
}

/// Configuration errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[diagnostic(code(marginalia::config))]
pub enum ConfigError {
    #[error("unsupported config format: {0}")]
    #[diagnostic(help("use a .json or .toml file"))]
    UnsupportedFormat(String),

    #[error("failed to read config")]
    Read(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to write config")]
    Write(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while opening or using a transport link.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[diagnostic(code(marginalia::transport))]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("link closed")]
    Closed,

    #[error("failed to encode or decode frame")]
    Codec(#[from] postcard::Error),
}

/// Errors raised by credential sources and the server handshake.
#[derive(thiserror::Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[diagnostic(code(marginalia::auth))]
pub enum AuthError {
    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error("credentials unavailable: {0}")]
    Unavailable(String),
}
