//! Connections between a local replica and the sync server.
//!
//! Connecting is offline-first: the cached replica is restored before the
//! network is touched, and every failure after that leaves the replica
//! usable locally.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use loro::{ExportMode, LoroDoc};
use marginalia_common::transport::{CollabMessage, Transport, TransportLink};
use marginalia_common::{CollabConfig, CredentialSource, RequestToken, RequestTokens};
use smol_str::{SmolStr, format_smolstr};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::CrdtError;
use crate::persistence::{CacheStore, PersistenceRegistry, PersistenceWarning};

/// Commit origin of changes received from the server.
pub const REMOTE_ORIGIN: &str = "remote";

/// Root map for replica-wide bookkeeping.
pub const META_MAP: &str = "_meta";
const KEY_BOOTSTRAPPED: &str = "bootstrapped";

/// Which replica of a document a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The document body.
    Document,
    Comments,
    Suggestions,
}

impl Channel {
    /// Name the server and the cache know this channel's replica by.
    pub fn replica_name(self, document: &str) -> SmolStr {
        match self {
            Channel::Document => SmolStr::new(document),
            Channel::Comments => format_smolstr!("{document}/comments"),
            Channel::Suggestions => format_smolstr!("{document}/suggestions"),
        }
    }
}

/// Things a connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The first successful sync of this connection.
    FirstSyncCompleted {
        /// Neither the replica (cache included) nor the server had any content.
        is_first_ever_sync: bool,
    },
    /// A sync with the server finished.
    Synced,
    AuthenticationFailed {
        reason: SmolStr,
    },
    PersistenceWarning(PersistenceWarning),
    /// Changes from the server were imported.
    RemoteUpdate,
    Disconnected {
        reason: SmolStr,
    },
}

/// Connection state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    /// Collaboration is off; the replica keeps working locally.
    LocalOnly {
        reason: SmolStr,
    },
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_local_only(&self) -> bool {
        matches!(self, Self::LocalOnly { .. })
    }
}

/// What a connection needs from the outside world.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub config: CollabConfig,
    pub credentials: Arc<dyn CredentialSource>,
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<dyn CacheStore>,
    pub persistence: Arc<Mutex<PersistenceRegistry>>,
}

impl ConnectionDeps {
    pub fn new(
        config: CollabConfig,
        credentials: Arc<dyn CredentialSource>,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            credentials,
            transport,
            cache,
            persistence: Arc::new(Mutex::new(PersistenceRegistry::new())),
        }
    }
}

/// Mark `doc` as seeded with initial content.
///
/// Returns `true` only for the replica that sets the marker, so exactly one
/// participant seeds a brand-new document from whatever it had locally.
pub fn claim_bootstrap(doc: &LoroDoc) -> Result<bool, CrdtError> {
    let meta = doc.get_map(META_MAP);
    if meta.get(KEY_BOOTSTRAPPED).is_some() {
        return Ok(false);
    }
    meta.insert(KEY_BOOTSTRAPPED, true)?;
    doc.set_next_commit_origin("bootstrap");
    doc.commit();
    Ok(true)
}

/// A live connection for one channel of one document.
pub struct ReplicaConnection {
    document_id: SmolStr,
    sharing_key: Option<SmolStr>,
    channel: Channel,
    doc: LoroDoc,
    deps: ConnectionDeps,
    tokens: Arc<RequestTokens>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    first_sync_done: Arc<AtomicBool>,
    driver: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl ReplicaConnection {
    /// Start connecting `doc` as `channel` of `document_id`. Failures are
    /// reported through events and [`Self::status`], never returned.
    pub fn connect(
        document_id: &str,
        sharing_key: Option<&str>,
        channel: Channel,
        doc: LoroDoc,
        deps: ConnectionDeps,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let mut connection = Self {
            document_id: SmolStr::new(document_id),
            sharing_key: sharing_key.map(SmolStr::new),
            channel,
            doc,
            deps,
            tokens: Arc::new(RequestTokens::new()),
            status: Arc::new(status),
            events_tx,
            events_rx: Some(events_rx),
            first_sync_done: Arc::new(AtomicBool::new(false)),
            driver: None,
        };
        connection.start();
        connection
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Local replica name (also the cache name).
    pub fn name(&self) -> SmolStr {
        self.channel.replica_name(&self.document_id)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Take the event stream. Can only be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.take()
    }

    /// Close the network session and the cache. The replica stays usable.
    pub async fn disconnect(&mut self) {
        self.stop().await;
        self.status.send_replace(ConnectionStatus::Disconnected);
        let _ = self.events_tx.send(ConnectionEvent::Disconnected {
            reason: SmolStr::new_static("disconnected by client"),
        });
    }

    /// Drop the current session and start a fresh one. Results still in
    /// flight for the old session are discarded.
    pub async fn reconnect(&mut self) {
        self.stop().await;
        self.start();
    }

    fn start(&mut self) {
        let token = self.tokens.issue();
        self.status.send_replace(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = Driver {
            name: self.name(),
            document_id: self.document_id.clone(),
            sharing_key: self.sharing_key.clone(),
            channel: self.channel,
            doc: self.doc.clone(),
            deps: self.deps.clone(),
            tokens: self.tokens.clone(),
            token,
            status: self.status.clone(),
            events: self.events_tx.clone(),
            first_sync_done: self.first_sync_done.clone(),
        };
        let handle = tokio::spawn(driver.run(shutdown_rx));
        self.driver = Some((shutdown_tx, handle));
    }

    async fn stop(&mut self) {
        self.tokens.invalidate();
        if let Some((shutdown, handle)) = self.driver.take() {
            let _ = shutdown.send(());
            if let Err(e) = handle.await {
                tracing::warn!(name = %self.name(), ?e, "connection driver ended abnormally");
            }
        }
    }
}

impl Drop for ReplicaConnection {
    fn drop(&mut self) {
        if let Some((shutdown, _)) = self.driver.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Why a network session ended.
enum SessionEnd {
    Superseded,
    AuthFailed(SmolStr),
    Unreachable(SmolStr),
    Closed,
}

/// Owns one connect attempt from cache restore to shutdown.
struct Driver {
    name: SmolStr,
    document_id: SmolStr,
    sharing_key: Option<SmolStr>,
    channel: Channel,
    doc: LoroDoc,
    deps: ConnectionDeps,
    tokens: Arc<RequestTokens>,
    token: RequestToken,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    first_sync_done: Arc<AtomicBool>,
}

impl Driver {
    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(name = %self.name, "connection event dropped, nobody listening");
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if self.tokens.is_current(self.token) {
            self.status.send_replace(status);
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let (warn_tx, mut warn_rx) = mpsc::unbounded_channel();
        let readiness = {
            let mut registry = self.deps.persistence.lock().await;
            registry
                .open(
                    &self.name,
                    &self.doc,
                    self.deps.cache.clone(),
                    &self.deps.config,
                    Some(warn_tx),
                )
                .await
        };
        {
            let events = self.events.clone();
            tokio::spawn(async move {
                while let Some(warning) = warn_rx.recv().await {
                    let _ = events.send(ConnectionEvent::PersistenceWarning(warning));
                }
            });
        }

        let outcome = tokio::select! {
            outcome = readiness.wait() => outcome,
            _ = &mut shutdown => {
                self.release().await;
                return;
            }
        };
        if let Some(warning) = outcome.warning {
            self.emit(ConnectionEvent::PersistenceWarning(warning));
        }
        tracing::debug!(name = %self.name, restored = outcome.restored, "replica ready, connecting");

        let end = tokio::select! {
            end = self.session() => Some(end),
            _ = &mut shutdown => None,
        };
        let session_ended = end.is_some();
        match end {
            None | Some(SessionEnd::Superseded) => {}
            Some(SessionEnd::AuthFailed(reason)) => {
                tracing::warn!(name = %self.name, %reason, "authentication failed, working locally");
                self.set_status(ConnectionStatus::LocalOnly {
                    reason: reason.clone(),
                });
                self.emit(ConnectionEvent::AuthenticationFailed { reason });
            }
            Some(SessionEnd::Unreachable(reason)) => {
                tracing::warn!(name = %self.name, %reason, "sync server unreachable, working locally");
                self.set_status(ConnectionStatus::LocalOnly {
                    reason: reason.clone(),
                });
                self.emit(ConnectionEvent::Disconnected { reason });
            }
            Some(SessionEnd::Closed) => {
                tracing::info!(name = %self.name, "sync server closed the connection");
                self.set_status(ConnectionStatus::Disconnected);
                self.emit(ConnectionEvent::Disconnected {
                    reason: SmolStr::new_static("connection closed"),
                });
            }
        }

        // Keep the cache attached for local edits until told to stop.
        if session_ended {
            let _ = shutdown.await;
        }
        self.release().await;
    }

    async fn release(&self) {
        self.deps.persistence.lock().await.close(&self.name).await;
    }

    async fn session(&self) -> SessionEnd {
        let credentials = match self
            .deps
            .credentials
            .fetch(&self.document_id, self.sharing_key.as_deref())
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => return SessionEnd::AuthFailed(SmolStr::new(e.to_string())),
        };
        let mut link = match self.deps.transport.open(&credentials.ws_url).await {
            Ok(link) => link,
            Err(e) => return SessionEnd::Unreachable(SmolStr::new(e.to_string())),
        };

        let room = self.channel.replica_name(&credentials.document_name);
        let auth = CollabMessage::Auth {
            token: credentials.token.clone(),
            document: room.clone(),
        };
        if link.send(&auth).is_err() {
            return SessionEnd::Closed;
        }
        match link.recv().await {
            Some(CollabMessage::AuthAccepted) => {}
            Some(CollabMessage::AuthFailed { reason }) => return SessionEnd::AuthFailed(reason),
            Some(other) => {
                tracing::debug!(?other, "unexpected reply to auth");
                return SessionEnd::Closed;
            }
            None => return SessionEnd::Closed,
        }

        let (local_tx, mut local_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let _local_updates = self.doc.subscribe_local_update(Box::new(move |update| {
            local_tx.send(update.to_vec()).is_ok()
        }));

        if link.send(&CollabMessage::SyncRequest).is_err() {
            return SessionEnd::Closed;
        }
        let server_updates = loop {
            match link.recv().await {
                Some(CollabMessage::SyncResponse { updates }) => break updates,
                Some(CollabMessage::Update { data }) => {
                    self.import(&data);
                }
                Some(other) => tracing::debug!(?other, "ignoring message while syncing"),
                None => return SessionEnd::Closed,
            }
        };
        if !self.tokens.is_current(self.token) {
            tracing::debug!(name = %self.name, "discarding stale sync response");
            return SessionEnd::Superseded;
        }
        for update in &server_updates {
            self.import(update);
        }
        let is_first_ever_sync = self.doc.oplog_frontiers().is_empty();
        if let Err(end) = self.push_missing(&link, &server_updates) {
            return end;
        }

        if !self.first_sync_done.swap(true, Ordering::AcqRel) {
            self.emit(ConnectionEvent::FirstSyncCompleted { is_first_ever_sync });
        }
        self.set_status(ConnectionStatus::Connected);
        self.emit(ConnectionEvent::Synced);
        tracing::info!(name = %self.name, %room, is_first_ever_sync, "replica synced");

        loop {
            tokio::select! {
                Some(update) = local_rx.recv() => {
                    if link.send(&CollabMessage::Update { data: update }).is_err() {
                        return SessionEnd::Closed;
                    }
                }
                message = link.recv() => match message {
                    Some(CollabMessage::Update { data }) => {
                        if self.import(&data) {
                            self.emit(ConnectionEvent::RemoteUpdate);
                        }
                    }
                    Some(other) => tracing::debug!(?other, "ignoring unexpected message"),
                    None => return SessionEnd::Closed,
                },
            }
        }
    }

    fn import(&self, data: &[u8]) -> bool {
        match self.doc.import_with(data, REMOTE_ORIGIN) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(name = %self.name, %e, "failed to import remote update");
                false
            }
        }
    }

    /// Send the server whatever this replica has that the server's history
    /// does not, such as edits made while offline.
    fn push_missing(&self, link: &TransportLink, server_updates: &[Vec<u8>]) -> Result<(), SessionEnd> {
        let server = LoroDoc::new();
        for update in server_updates {
            if let Err(e) = server.import(update) {
                tracing::debug!(%e, "skipping unreadable server update");
            }
        }
        let server_vv = server.oplog_vv();
        if self.doc.oplog_vv() == server_vv {
            return Ok(());
        }
        let missing = match self.doc.export(ExportMode::Updates {
            from: Cow::Owned(server_vv),
        }) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(name = %self.name, %e, "failed to export local changes");
                return Ok(());
            }
        };
        if missing.is_empty() {
            return Ok(());
        }
        tracing::debug!(name = %self.name, len = missing.len(), "pushing local changes");
        link.send(&CollabMessage::Update { data: missing })
            .map_err(|_| SessionEnd::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_names() {
        assert_eq!(Channel::Document.replica_name("doc-1"), "doc-1");
        assert_eq!(Channel::Comments.replica_name("doc-1"), "doc-1/comments");
        assert_eq!(
            Channel::Suggestions.replica_name("doc-1"),
            "doc-1/suggestions"
        );
    }

    #[test]
    fn test_only_one_bootstrap_claim_wins() {
        let a = LoroDoc::new();
        let b = LoroDoc::new();
        assert!(claim_bootstrap(&a).unwrap());
        assert!(!claim_bootstrap(&a).unwrap());

        b.import(&a.export(ExportMode::all_updates()).unwrap())
            .unwrap();
        assert!(!claim_bootstrap(&b).unwrap());
    }

    #[test]
    fn test_status_helpers() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Connecting);
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(
            ConnectionStatus::LocalOnly {
                reason: "offline".into()
            }
            .is_local_only()
        );
    }
}
