//! In-process sync server.
//!
//! `MemoryHub` speaks the same [`CollabMessage`] protocol as the websocket
//! server: it authorizes tokens, keeps every update it has seen per document
//! name, answers sync requests with that history and relays updates to the
//! other peers of the same document. Used by tests and the CLI demo.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use n0_future::boxed::BoxFuture;
use smol_str::SmolStr;
use tokio::sync::mpsc;

use super::{CollabMessage, Transport, TransportLink};
use crate::error::TransportError;

type PeerId = u64;

#[derive(Default)]
struct Room {
    updates: Vec<Vec<u8>>,
    peers: HashSet<PeerId>,
}

#[derive(Default)]
struct HubState {
    offline: bool,
    /// `None` accepts every token.
    allowed_tokens: Option<HashSet<SmolStr>>,
    rooms: HashMap<SmolStr, Room>,
    /// The only sender for each open link, so dropping it closes the link.
    links: HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>,
    next_peer: PeerId,
}

impl HubState {
    fn authorizes(&self, token: &str) -> bool {
        self.allowed_tokens
            .as_ref()
            .is_none_or(|allowed| allowed.contains(token))
    }

    fn deliver(&self, peer: PeerId, message: &CollabMessage) -> bool {
        let Some(link) = self.links.get(&peer) else {
            return false;
        };
        match message.to_bytes() {
            Ok(frame) => link.send(frame).is_ok(),
            Err(e) => {
                tracing::warn!(?e, "hub failed to encode message");
                false
            }
        }
    }
}

/// In-process relay implementing [`Transport`].
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restrict authentication to the given tokens. Can be called repeatedly.
    pub fn allow_token(&self, token: impl Into<SmolStr>) {
        self.state()
            .allowed_tokens
            .get_or_insert_with(HashSet::new)
            .insert(token.into());
    }

    /// Take the hub off- or online. Going offline closes every open link.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        state.offline = !online;
        if !online {
            state.links.clear();
            for room in state.rooms.values_mut() {
                room.peers.clear();
            }
        }
    }

    /// Update blobs stored for a document.
    pub fn updates(&self, document: &str) -> Vec<Vec<u8>> {
        self.state()
            .rooms
            .get(document)
            .map(|room| room.updates.clone())
            .unwrap_or_default()
    }

    /// Number of authenticated peers on a document.
    pub fn peer_count(&self, document: &str) -> usize {
        self.state()
            .rooms
            .get(document)
            .map_or(0, |room| room.peers.len())
    }

    async fn serve(self, peer: PeerId, mut from_client: mpsc::UnboundedReceiver<Vec<u8>>) {
        let mut joined: Option<SmolStr> = None;

        while let Some(frame) = from_client.recv().await {
            let message = match CollabMessage::from_bytes(&frame) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(?e, peer, "hub dropped undecodable frame");
                    continue;
                }
            };

            let mut state = self.state();
            if !state.links.contains_key(&peer) {
                break;
            }

            match message {
                CollabMessage::Auth { token, document } => {
                    if state.authorizes(&token) {
                        state
                            .rooms
                            .entry(document.clone())
                            .or_default()
                            .peers
                            .insert(peer);
                        tracing::debug!(peer, %document, "hub accepted peer");
                        joined = Some(document);
                        state.deliver(peer, &CollabMessage::AuthAccepted);
                    } else {
                        tracing::debug!(peer, %document, "hub rejected token");
                        state.deliver(
                            peer,
                            &CollabMessage::AuthFailed {
                                reason: SmolStr::new_static("invalid token"),
                            },
                        );
                        state.links.remove(&peer);
                        break;
                    }
                }
                CollabMessage::SyncRequest => {
                    let Some(document) = &joined else { continue };
                    let updates = state
                        .rooms
                        .get(document)
                        .map(|room| room.updates.clone())
                        .unwrap_or_default();
                    state.deliver(peer, &CollabMessage::SyncResponse { updates });
                }
                CollabMessage::Update { data } => {
                    let Some(document) = &joined else { continue };
                    let Some(room) = state.rooms.get_mut(document) else {
                        continue;
                    };
                    room.updates.push(data.clone());
                    let others: Vec<PeerId> =
                        room.peers.iter().copied().filter(|p| *p != peer).collect();
                    let relay = CollabMessage::Update { data };
                    for other in others {
                        if !state.deliver(other, &relay) {
                            tracing::trace!(peer = other, "relay target gone");
                        }
                    }
                }
                other => {
                    tracing::debug!(?other, peer, "hub ignoring unexpected message");
                }
            }
        }

        let mut state = self.state();
        state.links.remove(&peer);
        if let Some(document) = joined {
            if let Some(room) = state.rooms.get_mut(&document) {
                room.peers.remove(&peer);
            }
        }
    }
}

impl Transport for MemoryHub {
    fn open(&self, ws_url: &str) -> BoxFuture<Result<TransportLink, TransportError>> {
        let hub = self.clone();
        let ws_url = ws_url.to_owned();
        Box::pin(async move {
            let (to_hub, from_client) = mpsc::unbounded_channel();
            let (to_client, from_hub) = mpsc::unbounded_channel();
            let peer = {
                let mut state = hub.state();
                if state.offline {
                    return Err(TransportError::Unreachable(ws_url));
                }
                state.next_peer += 1;
                let peer = state.next_peer;
                state.links.insert(peer, to_client);
                peer
            };
            tokio::spawn(hub.serve(peer, from_client));
            Ok(TransportLink::new(to_hub, from_hub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(hub: &MemoryHub, token: &str, document: &str) -> TransportLink {
        let mut link = hub.open("mem://hub").await.unwrap();
        link.send(&CollabMessage::Auth {
            token: token.into(),
            document: document.into(),
        })
        .unwrap();
        assert_eq!(link.recv().await, Some(CollabMessage::AuthAccepted));
        link
    }

    #[tokio::test]
    async fn test_updates_are_relayed_and_replayed() {
        let hub = MemoryHub::new();
        let a = join(&hub, "t", "doc").await;
        let mut b = join(&hub, "t", "doc").await;

        a.send(&CollabMessage::Update { data: vec![7] }).unwrap();
        assert_eq!(
            b.recv().await,
            Some(CollabMessage::Update { data: vec![7] })
        );

        let mut late = join(&hub, "t", "doc").await;
        late.send(&CollabMessage::SyncRequest).unwrap();
        assert_eq!(
            late.recv().await,
            Some(CollabMessage::SyncResponse {
                updates: vec![vec![7]]
            })
        );
        assert_eq!(hub.peer_count("doc"), 3);
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected_and_link_closed() {
        let hub = MemoryHub::new();
        hub.allow_token("good");
        let mut link = hub.open("mem://hub").await.unwrap();
        link.send(&CollabMessage::Auth {
            token: "bad".into(),
            document: "doc".into(),
        })
        .unwrap();
        assert!(matches!(
            link.recv().await,
            Some(CollabMessage::AuthFailed { .. })
        ));
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_offline_hub_refuses_and_closes_links() {
        let hub = MemoryHub::new();
        let mut link = join(&hub, "t", "doc").await;
        hub.set_online(false);
        assert_eq!(link.recv().await, None);
        assert!(matches!(
            hub.open("mem://hub").await,
            Err(TransportError::Unreachable(_))
        ));
    }
}
