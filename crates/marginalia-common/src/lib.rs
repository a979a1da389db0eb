//! Shared plumbing for marginalia: configuration, errors, telemetry,
//! the credential contract and the sync transport.

pub mod config;
pub mod credentials;
pub mod error;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod tokens;
pub mod transport;

pub use config::{ChannelToggles, CollabConfig, FileStore, Loader, Saver, UserIdentity};
pub use credentials::{CredentialSource, Credentials, StaticCredentials};
pub use error::{AuthError, ConfigError, MarginaliaError, SerDeError, TransportError};
pub use tokens::{RequestToken, RequestTokens};
