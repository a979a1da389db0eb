use n0_future::boxed::BoxFuture;
use tokio::sync::mpsc;

use super::CollabMessage;
use crate::error::TransportError;

/// A duplex frame link to the sync server.
///
/// Frames are postcard-encoded [`CollabMessage`]s. The server closing its end
/// shows up as `recv()` returning `None`.
pub struct TransportLink {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TransportLink {
    pub fn new(
        outgoing: mpsc::UnboundedSender<Vec<u8>>,
        incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    pub fn send(&self, message: &CollabMessage) -> Result<(), TransportError> {
        let frame = message.to_bytes()?;
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    /// Receive the next decodable message.
    ///
    /// Frames that fail to decode are logged and skipped.
    pub async fn recv(&mut self) -> Option<CollabMessage> {
        loop {
            let frame = self.incoming.recv().await?;
            match CollabMessage::from_bytes(&frame) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(?e, len = frame.len(), "failed to decode collab message");
                }
            }
        }
    }
}

/// Opens links to a sync server.
pub trait Transport: Send + Sync {
    fn open(&self, ws_url: &str) -> BoxFuture<Result<TransportLink, TransportError>>;
}
