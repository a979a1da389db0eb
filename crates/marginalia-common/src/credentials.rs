//! Credential contract between the host application and the sync layer.
//!
//! The host fetches a short-lived token for a document (optionally via a
//! sharing key) and hands back the websocket endpoint and the canonical
//! document name the server knows the replica by.

use n0_future::boxed::BoxFuture;
use smol_str::SmolStr;

use crate::error::AuthError;

/// What a connection needs to reach and authenticate against the sync server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: SmolStr,
    pub ws_url: String,
    pub document_name: SmolStr,
}

/// Source of [`Credentials`] for a document.
pub trait CredentialSource: Send + Sync {
    fn fetch(
        &self,
        document_id: &str,
        sharing_key: Option<&str>,
    ) -> BoxFuture<Result<Credentials, AuthError>>;
}

/// Hands out the same token for every document.
///
/// If a sharing key is configured, requests must present it.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: SmolStr,
    ws_url: String,
    sharing_key: Option<SmolStr>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<SmolStr>, ws_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ws_url: ws_url.into(),
            sharing_key: None,
        }
    }

    pub fn with_sharing_key(mut self, key: impl Into<SmolStr>) -> Self {
        self.sharing_key = Some(key.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn fetch(
        &self,
        document_id: &str,
        sharing_key: Option<&str>,
    ) -> BoxFuture<Result<Credentials, AuthError>> {
        let result = match (&self.sharing_key, sharing_key) {
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (Some(_), _) => Err(AuthError::Rejected("invalid sharing key".into())),
            (None, _) => Ok(()),
        }
        .map(|()| Credentials {
            token: self.token.clone(),
            ws_url: self.ws_url.clone(),
            document_name: SmolStr::new(document_id),
        });
        Box::pin(async move { result })
    }
}
