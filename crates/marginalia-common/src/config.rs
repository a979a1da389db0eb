use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, SerDeError};

/// Default time LocalPersistence waits for a cache load before giving up.
pub const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 3000;

/// Collaboration configuration.
///
/// Passed explicitly to every connection factory. There is no process-wide
/// "current" config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Base URL of the sync server.
    pub server_url: String,
    /// Directory holding cached replica snapshots.
    pub cache_dir: PathBuf,
    /// Bumped when the cached layout changes; part of every cache key.
    pub cache_version: SmolStr,
    /// How long to wait for a cache load before continuing without it.
    pub persistence_timeout_ms: u64,
    /// Identity stamped onto authored comments and suggestions.
    pub user: UserIdentity,
    /// Which auxiliary channels to open alongside the main document.
    pub channels: ChannelToggles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserIdentity {
    pub id: SmolStr,
    pub name: SmolStr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelToggles {
    pub comments: bool,
    pub suggestions: bool,
}

impl CollabConfig {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, ConfigError> {
        loader.load().await.map_err(ConfigError::Read)
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<(), ConfigError> {
        saver.save(self).await.map_err(ConfigError::Write)
    }

    /// Cache key for a replica: `<documentName>-<cacheVersion>`.
    pub fn cache_key(&self, document_name: &str) -> String {
        format!("{document_name}-{}", self.cache_version)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }
}

impl Default for CollabConfig {
    /// The default configuration points at a local sync server and keeps
    /// caches under `.marginalia/cache`.
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:1234".to_owned(),
            cache_dir: PathBuf::from(".marginalia/cache"),
            cache_version: SmolStr::new_static("v1"),
            persistence_timeout_ms: DEFAULT_PERSISTENCE_TIMEOUT_MS,
            user: UserIdentity::default(),
            channels: ChannelToggles::default(),
        }
    }
}

impl Default for UserIdentity {
    fn default() -> Self {
        Self {
            id: SmolStr::new_static("anonymous"),
            name: SmolStr::new_static("Anonymous"),
        }
    }
}

impl Default for ChannelToggles {
    fn default() -> Self {
        Self {
            comments: true,
            suggestions: true,
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = core::result::Result<CollabConfig, BoxError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(
        &self,
        config: &CollabConfig,
    ) -> impl Future<Output = core::result::Result<(), BoxError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// [`CollabConfig`] data will be serialized and deserialized based on the
    /// file extension. `.json` and `.toml` are supported.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> Result<&str, ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some(ext @ ("json" | "toml")) => Ok(ext),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_owned(),
            )),
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> core::result::Result<CollabConfig, BoxError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let config = match self.format()? {
            "json" => serde_json::from_str(&raw).map_err(SerDeError::from)?,
            _ => toml::from_str(&raw).map_err(SerDeError::from)?,
        };
        Ok(config)
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &CollabConfig) -> core::result::Result<(), BoxError> {
        let raw = match self.format()? {
            "json" => serde_json::to_string_pretty(config).map_err(SerDeError::from)?,
            _ => toml::to_string_pretty(config).map_err(SerDeError::from)?,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
