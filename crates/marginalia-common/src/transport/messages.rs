//! Wire protocol between a replica and the sync server.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Messages exchanged between a replica connection and the sync server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollabMessage {
    /// First frame on every link.
    Auth {
        /// Short-lived token from the credential source
        token: SmolStr,
        /// Replica name, e.g. `doc-1/comments`
        document: SmolStr,
    },

    /// Server accepted the token.
    AuthAccepted,

    /// Server rejected the token; the link closes after this frame.
    AuthFailed { reason: SmolStr },

    /// Ask the server for every update it holds for the document.
    SyncRequest,

    /// Reply to [`CollabMessage::SyncRequest`].
    SyncResponse {
        /// Loro update blobs in the order the server received them
        updates: Vec<Vec<u8>>,
    },

    /// Incremental Loro update.
    Update { data: Vec<u8> },
}

impl CollabMessage {
    /// Serialize message to postcard bytes for wire transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    /// Deserialize message from postcard bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_frame_is_rejected() {
        assert!(CollabMessage::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_sync_response_keeps_update_order() {
        let msg = CollabMessage::SyncResponse {
            updates: vec![vec![1, 2], vec![], vec![3]],
        };
        let decoded = CollabMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }
}
