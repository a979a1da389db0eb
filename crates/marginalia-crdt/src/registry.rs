use std::collections::HashMap;

use loro::LoroDoc;
use smol_str::SmolStr;

use crate::connection::{Channel, ConnectionDeps, ReplicaConnection};

/// Connections for one mounted document.
pub struct MountedDocument {
    pub document_id: SmolStr,
    pub document: ReplicaConnection,
    /// `None` when the comments channel is switched off.
    pub comments: Option<ReplicaConnection>,
    pub suggestions: Option<ReplicaConnection>,
}

impl MountedDocument {
    pub fn connection(&self, channel: Channel) -> Option<&ReplicaConnection> {
        match channel {
            Channel::Document => Some(&self.document),
            Channel::Comments => self.comments.as_ref(),
            Channel::Suggestions => self.suggestions.as_ref(),
        }
    }

    pub fn connection_mut(&mut self, channel: Channel) -> Option<&mut ReplicaConnection> {
        match channel {
            Channel::Document => Some(&mut self.document),
            Channel::Comments => self.comments.as_mut(),
            Channel::Suggestions => self.suggestions.as_mut(),
        }
    }

    async fn disconnect(&mut self) {
        self.document.disconnect().await;
        if let Some(comments) = &mut self.comments {
            comments.disconnect().await;
        }
        if let Some(suggestions) = &mut self.suggestions {
            suggestions.disconnect().await;
        }
    }
}

/// Mounted documents by id. At most one set of connections per document.
pub struct ConnectionRegistry {
    deps: ConnectionDeps,
    mounted: HashMap<SmolStr, MountedDocument>,
}

impl ConnectionRegistry {
    pub fn new(deps: ConnectionDeps) -> Self {
        Self {
            deps,
            mounted: HashMap::new(),
        }
    }

    pub fn deps(&self) -> &ConnectionDeps {
        &self.deps
    }

    /// Connect every enabled channel of `document_id`, each on a fresh
    /// replica. Mounting an already mounted document replaces it.
    pub async fn mount(
        &mut self,
        document_id: &str,
        sharing_key: Option<&str>,
    ) -> &mut MountedDocument {
        self.unmount(document_id).await;

        let toggles = self.deps.config.channels;
        let connect = |channel| {
            ReplicaConnection::connect(
                document_id,
                sharing_key,
                channel,
                LoroDoc::new(),
                self.deps.clone(),
            )
        };
        let mounted = MountedDocument {
            document_id: SmolStr::new(document_id),
            document: connect(Channel::Document),
            comments: toggles.comments.then(|| connect(Channel::Comments)),
            suggestions: toggles.suggestions.then(|| connect(Channel::Suggestions)),
        };
        tracing::info!(
            %document_id,
            comments = toggles.comments,
            suggestions = toggles.suggestions,
            "mounted document"
        );
        self.mounted
            .entry(SmolStr::new(document_id))
            .insert_entry(mounted)
            .into_mut()
    }

    pub fn get(&self, document_id: &str) -> Option<&MountedDocument> {
        self.mounted.get(document_id)
    }

    pub fn get_mut(&mut self, document_id: &str) -> Option<&mut MountedDocument> {
        self.mounted.get_mut(document_id)
    }

    pub fn is_mounted(&self, document_id: &str) -> bool {
        self.mounted.contains_key(document_id)
    }

    /// Disconnect and forget a document. Returns whether it was mounted.
    pub async fn unmount(&mut self, document_id: &str) -> bool {
        let Some(mut mounted) = self.mounted.remove(document_id) else {
            return false;
        };
        mounted.disconnect().await;
        tracing::info!(%document_id, "unmounted document");
        true
    }

    pub async fn unmount_all(&mut self) {
        let ids: Vec<SmolStr> = self.mounted.keys().cloned().collect();
        for id in ids {
            self.unmount(&id).await;
        }
    }
}
