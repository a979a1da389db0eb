//! Offline cache for replicas.
//!
//! A [`LocalPersistence`] restores a replica from its cache when opened and
//! writes a snapshot back whenever the replica changes. Readiness always
//! resolves: a stalled load gives up after the configured timeout and a
//! failed load clears the cache. Neither is fatal.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use loro::event::DiffEvent;
use loro::{ExportMode, LoroDoc, Subscription};
use marginalia_common::CollabConfig;
use n0_future::boxed::BoxFuture;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::CrdtError;

/// Commit origin of changes restored from the cache.
pub const PERSISTENCE_ORIGIN: &str = "persistence";

/// Byte storage for cached replicas.
pub trait CacheStore: Send + Sync + 'static {
    /// Load the bytes under `key`, `None` if nothing is cached.
    fn load(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, CrdtError>>;

    fn store(&self, key: &str, bytes: Vec<u8>) -> BoxFuture<Result<(), CrdtError>>;

    fn clear(&self, key: &str) -> BoxFuture<Result<(), CrdtError>>;
}

/// One file per cache key inside a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document names may contain `/` (channel replicas), which is not
    /// allowed in a file name.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.loro", key.replace(['/', '\\'], "~")))
    }
}

impl CacheStore for FileCache {
    fn load(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, CrdtError>> {
        let path = self.path_for(key);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn store(&self, key: &str, bytes: Vec<u8>) -> BoxFuture<Result<(), CrdtError>> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;
            let tmp = path.with_extension("loro.tmp");
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok(())
        })
    }

    fn clear(&self, key: &str) -> BoxFuture<Result<(), CrdtError>> {
        let path = self.path_for(key);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[derive(Default)]
struct MemoryCacheState {
    entries: HashMap<String, Vec<u8>>,
    stalled: HashSet<String>,
    failing: HashSet<String>,
    writes: usize,
}

/// In-memory [`CacheStore`]. Loads of selected keys can be made to hang or
/// fail.
#[derive(Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<MemoryCacheState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.state().entries.insert(key.into(), bytes);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state().entries.get(key).cloned()
    }

    /// Loads of `key` never complete.
    pub fn stall(&self, key: impl Into<String>) {
        self.state().stalled.insert(key.into());
    }

    /// Loads of `key` return an error.
    pub fn fail_loads(&self, key: impl Into<String>) {
        self.state().failing.insert(key.into());
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

impl CacheStore for MemoryCache {
    fn load(&self, key: &str) -> BoxFuture<Result<Option<Vec<u8>>, CrdtError>> {
        let state = self.state();
        if state.stalled.contains(key) {
            return Box::pin(std::future::pending());
        }
        let result = if state.failing.contains(key) {
            Err(CrdtError::Cache(format!("load of {key} failed")))
        } else {
            Ok(state.entries.get(key).cloned())
        };
        Box::pin(async move { result })
    }

    fn store(&self, key: &str, bytes: Vec<u8>) -> BoxFuture<Result<(), CrdtError>> {
        let mut state = self.state();
        state.entries.insert(key.to_owned(), bytes);
        state.writes += 1;
        Box::pin(async { Ok(()) })
    }

    fn clear(&self, key: &str) -> BoxFuture<Result<(), CrdtError>> {
        let mut state = self.state();
        state.entries.remove(key);
        state.failing.remove(key);
        Box::pin(async { Ok(()) })
    }
}

/// Something went wrong with the cache that the user may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceWarning {
    /// Loading took longer than the configured timeout.
    LoadTimedOut { key: String },
    /// The cached data could not be loaded and was removed.
    CacheCleared { key: String, reason: String },
    /// Writing a snapshot failed.
    WriteFailed { key: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceOutcome {
    /// Cached data was imported into the replica.
    pub restored: bool,
    pub warning: Option<PersistenceWarning>,
}

/// Resolves once the cache load has finished, timed out or failed.
#[derive(Clone)]
pub struct Readiness(watch::Receiver<Option<PersistenceOutcome>>);

impl Readiness {
    pub async fn wait(mut self) -> PersistenceOutcome {
        match self.0.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_default(),
            // The loader went away without reporting, so there is nothing to wait for.
            Err(_) => PersistenceOutcome::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.0.borrow().is_some()
    }
}

/// Keeps one replica in sync with its cache entry.
pub struct LocalPersistence {
    key: String,
    doc: LoroDoc,
    store: Arc<dyn CacheStore>,
    ready: Readiness,
    /// Set once the cached state has been imported, so writes cannot
    /// clobber an entry that has not been read yet.
    loaded: watch::Receiver<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    _subscription: Subscription,
}

impl LocalPersistence {
    /// Start loading `document_name`'s cache into `doc` and keep writing
    /// changes back. Must be called from within a tokio runtime.
    pub fn open(
        document_name: &str,
        doc: &LoroDoc,
        store: Arc<dyn CacheStore>,
        config: &CollabConfig,
        warnings: Option<mpsc::UnboundedSender<PersistenceWarning>>,
    ) -> Self {
        let key = config.cache_key(document_name);
        let dirty = Arc::new(Notify::new());
        let subscription = {
            let dirty = dirty.clone();
            doc.subscribe_root(Arc::new(move |_: DiffEvent<'_>| dirty.notify_one()))
        };
        let (ready_tx, ready_rx) = watch::channel(None);
        let (loaded_tx, loaded_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            key: key.clone(),
            doc: doc.clone(),
            store: store.clone(),
            timeout: config.persistence_timeout(),
            dirty,
            warnings,
        };
        let task = tokio::spawn(worker.run(ready_tx, loaded_tx, shutdown_rx));
        tracing::debug!(%key, "persistence opened");

        Self {
            key,
            doc: doc.clone(),
            store,
            ready: Readiness(ready_rx),
            loaded: loaded_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            _subscription: subscription,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.clone()
    }

    pub async fn ready(&self) -> PersistenceOutcome {
        self.readiness().wait().await
    }

    /// Write a snapshot now. Does nothing until the cache has been loaded.
    pub async fn flush(&self) -> Result<(), CrdtError> {
        if !*self.loaded.borrow() {
            return Ok(());
        }
        write_snapshot(&self.key, &self.doc, self.store.as_ref()).await
    }

    /// Stop writing and detach from the replica. Cached data is kept.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(key = %self.key, ?e, "persistence task ended abnormally");
            }
        }
        if let Err(e) = self.flush().await {
            tracing::warn!(key = %self.key, %e, "final cache write failed");
        }
        tracing::debug!(key = %self.key, "persistence closed");
    }
}

struct Worker {
    key: String,
    doc: LoroDoc,
    store: Arc<dyn CacheStore>,
    timeout: std::time::Duration,
    dirty: Arc<Notify>,
    warnings: Option<mpsc::UnboundedSender<PersistenceWarning>>,
}

impl Worker {
    async fn run(
        self,
        ready: watch::Sender<Option<PersistenceOutcome>>,
        loaded: watch::Sender<bool>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let load = self.load();
        tokio::pin!(load);
        tokio::select! {
            outcome = &mut load => {
                ready.send_replace(Some(outcome));
            }
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(key = %self.key, timeout = ?self.timeout, "cache load timed out, continuing without it");
                ready.send_replace(Some(PersistenceOutcome {
                    restored: false,
                    warning: Some(PersistenceWarning::LoadTimedOut { key: self.key.clone() }),
                }));
                // The load keeps going; writing before it lands would
                // overwrite the entry it is reading.
                tokio::select! {
                    outcome = &mut load => {
                        tracing::debug!(key = %self.key, restored = outcome.restored, "late cache load finished");
                    }
                    _ = &mut shutdown => return,
                }
            }
            _ = &mut shutdown => return,
        }
        loaded.send_replace(true);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.dirty.notified() => {
                    if let Err(e) = write_snapshot(&self.key, &self.doc, self.store.as_ref()).await {
                        tracing::warn!(key = %self.key, %e, "cache write failed");
                        if let Some(warnings) = &self.warnings {
                            let _ = warnings.send(PersistenceWarning::WriteFailed {
                                key: self.key.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn load(&self) -> PersistenceOutcome {
        let reason = match self.store.load(&self.key).await {
            Ok(None) => return PersistenceOutcome::default(),
            Ok(Some(bytes)) => match self.doc.import_with(&bytes, PERSISTENCE_ORIGIN) {
                Ok(_) => {
                    tracing::debug!(key = %self.key, len = bytes.len(), "restored replica from cache");
                    return PersistenceOutcome {
                        restored: true,
                        warning: None,
                    };
                }
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        };
        tracing::warn!(key = %self.key, %reason, "cache unreadable, clearing it");
        if let Err(e) = self.store.clear(&self.key).await {
            tracing::warn!(key = %self.key, %e, "failed to clear cache");
        }
        PersistenceOutcome {
            restored: false,
            warning: Some(PersistenceWarning::CacheCleared {
                key: self.key.clone(),
                reason,
            }),
        }
    }
}

async fn write_snapshot(key: &str, doc: &LoroDoc, store: &dyn CacheStore) -> Result<(), CrdtError> {
    let bytes = doc
        .export(ExportMode::Snapshot)
        .map_err(|e| CrdtError::Export(e.to_string()))?;
    store.store(key, bytes).await?;
    tracing::trace!(%key, "cache written");
    Ok(())
}

/// Open persistence instances by document name. Opening a name that is
/// already open closes the earlier instance first.
#[derive(Default)]
pub struct PersistenceRegistry {
    open: HashMap<String, LocalPersistence>,
}

impl PersistenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &mut self,
        document_name: &str,
        doc: &LoroDoc,
        store: Arc<dyn CacheStore>,
        config: &CollabConfig,
        warnings: Option<mpsc::UnboundedSender<PersistenceWarning>>,
    ) -> Readiness {
        if let Some(prior) = self.open.remove(document_name) {
            tracing::debug!(%document_name, "closing previous persistence instance");
            prior.close().await;
        }
        let persistence = LocalPersistence::open(document_name, doc, store, config, warnings);
        let readiness = persistence.readiness();
        self.open.insert(document_name.to_owned(), persistence);
        readiness
    }

    pub fn get(&self, document_name: &str) -> Option<&LocalPersistence> {
        self.open.get(document_name)
    }

    pub fn is_open(&self, document_name: &str) -> bool {
        self.open.contains_key(document_name)
    }

    pub async fn close(&mut self, document_name: &str) -> bool {
        match self.open.remove(document_name) {
            Some(persistence) => {
                persistence.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&mut self) {
        for (_, persistence) in self.open.drain() {
            persistence.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(timeout_ms: u64) -> CollabConfig {
        CollabConfig {
            persistence_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    fn doc_with_text(text: &str) -> LoroDoc {
        let doc = LoroDoc::new();
        doc.get_text("body").insert(0, text).unwrap();
        doc.commit();
        doc
    }

    #[tokio::test]
    async fn test_restores_cached_snapshot() {
        let cfg = config(1000);
        let cache = MemoryCache::new();
        let source = doc_with_text("cached");
        cache.insert(
            cfg.cache_key("doc"),
            source.export(ExportMode::Snapshot).unwrap(),
        );

        let doc = LoroDoc::new();
        let persistence = LocalPersistence::open("doc", &doc, Arc::new(cache), &cfg, None);
        let outcome = persistence.ready().await;
        assert!(outcome.restored);
        assert_eq!(outcome.warning, None);
        assert_eq!(doc.get_text("body").to_string(), "cached");
        persistence.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_load_resolves_after_timeout() {
        let cfg = config(3000);
        let cache = MemoryCache::new();
        cache.stall(cfg.cache_key("doc"));

        let doc = LoroDoc::new();
        let persistence =
            LocalPersistence::open("doc", &doc, Arc::new(cache.clone()), &cfg, None);
        let outcome = persistence.ready().await;
        assert_eq!(
            outcome.warning,
            Some(PersistenceWarning::LoadTimedOut {
                key: cfg.cache_key("doc")
            })
        );

        // Nothing is written while the stalled load is outstanding.
        doc.get_text("body").insert(0, "x").unwrap();
        doc.commit();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.writes(), 0);
        persistence.close().await;
        assert_eq!(cache.writes(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_cleared() {
        let cfg = config(1000);
        let cache = MemoryCache::new();
        cache.insert(cfg.cache_key("doc"), b"definitely not loro".to_vec());

        let doc = LoroDoc::new();
        let persistence =
            LocalPersistence::open("doc", &doc, Arc::new(cache.clone()), &cfg, None);
        let outcome = persistence.ready().await;
        assert!(!outcome.restored);
        assert!(matches!(
            outcome.warning,
            Some(PersistenceWarning::CacheCleared { .. })
        ));
        assert_eq!(cache.get(&cfg.cache_key("doc")), None);
        persistence.close().await;
    }

    #[tokio::test]
    async fn test_failed_load_is_cleared() {
        let cfg = config(1000);
        let cache = MemoryCache::new();
        cache.fail_loads(cfg.cache_key("doc"));
        let doc = LoroDoc::new();
        let persistence = LocalPersistence::open("doc", &doc, Arc::new(cache), &cfg, None);
        assert!(matches!(
            persistence.ready().await.warning,
            Some(PersistenceWarning::CacheCleared { .. })
        ));
        persistence.close().await;
    }

    #[tokio::test]
    async fn test_changes_are_written_back() {
        let cfg = config(1000);
        let cache = MemoryCache::new();
        let doc = LoroDoc::new();
        let persistence =
            LocalPersistence::open("doc", &doc, Arc::new(cache.clone()), &cfg, None);
        persistence.ready().await;

        doc.get_text("body").insert(0, "hello").unwrap();
        doc.commit();
        persistence.close().await;

        let restored = LoroDoc::new();
        restored
            .import(&cache.get(&cfg.cache_key("doc")).unwrap())
            .unwrap();
        assert_eq!(restored.get_text("body").to_string(), "hello");
    }

    #[tokio::test]
    async fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));
        assert_eq!(cache.load("doc/comments-v1").await.unwrap(), None);
        cache.store("doc/comments-v1", vec![1, 2, 3]).await.unwrap();
        assert!(cache.path_for("doc/comments-v1").ends_with("doc~comments-v1.loro"));
        assert_eq!(cache.load("doc/comments-v1").await.unwrap(), Some(vec![1, 2, 3]));
        cache.clear("doc/comments-v1").await.unwrap();
        cache.clear("doc/comments-v1").await.unwrap();
        assert_eq!(cache.load("doc/comments-v1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_registry_replaces_open_instance() {
        let cfg = config(1000);
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let doc = LoroDoc::new();
        let mut registry = PersistenceRegistry::new();
        registry
            .open("doc", &doc, cache.clone(), &cfg, None)
            .await
            .wait()
            .await;
        registry
            .open("doc", &doc, cache.clone(), &cfg, None)
            .await
            .wait()
            .await;
        assert!(registry.is_open("doc"));
        assert!(registry.close("doc").await);
        assert!(!registry.close("doc").await);
    }
}
