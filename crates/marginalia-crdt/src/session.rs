//! Editor-facing commands over a document, its anchors and its annotations.

use loro::LoroDoc;
use marginalia_common::UserIdentity;
use marginalia_editor_core::{
    AnchorBinding, AnchorDocument, SuggestionMarkKind, TextSpan, suggestion_mark_id,
};

use crate::annotations::{
    AnnotationStore, Comment, CommentKind, MutationSource, Thread, ThreadPatch, ThreadStatus,
    ThreadType, new_id,
};
use crate::error::CrdtError;
use crate::suggestion::{
    DeferredTask, ResolveAction, SuggestionKind, SuggestionResolution, SuggestionStates,
};

/// Everything one editor needs to work with annotations.
///
/// Owns the document handle, the anchor index, the annotation store and the
/// suggestion states. All commands are local mutations.
pub struct AnnotationSession<D: AnchorDocument> {
    document: D,
    binding: AnchorBinding,
    store: AnnotationStore,
    suggestions: SuggestionStates,
    resolution: SuggestionResolution,
    user: UserIdentity,
}

impl<D: AnchorDocument> AnnotationSession<D> {
    pub fn new(mut document: D, user: UserIdentity) -> Self {
        let mut binding = AnchorBinding::new();
        binding.rebuild(&mut document);
        Self {
            document,
            binding,
            store: AnnotationStore::new(),
            suggestions: SuggestionStates::local(),
            resolution: SuggestionResolution::new(),
            user,
        }
    }

    /// Follow the comments replica in `doc`.
    pub fn attach_comments(&mut self, doc: &LoroDoc) -> Result<(), CrdtError> {
        self.store.attach(doc)
    }

    /// Keep suggestion states in the replicated `doc` instead of locally.
    pub fn attach_suggestions(&mut self, doc: &LoroDoc) {
        self.suggestions = SuggestionStates::new(doc);
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Direct access for edits. Call [`Self::sync_document`] afterwards.
    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn binding(&self) -> &AnchorBinding {
        &self.binding
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AnnotationStore {
        &mut self.store
    }

    pub fn suggestions(&self) -> &SuggestionStates {
        &self.suggestions
    }

    /// Deferred tasks waiting for [`Self::run_deferred`].
    pub fn pending_tasks(&self) -> usize {
        self.resolution.pending()
    }

    /// Start a comment thread on `span`.
    ///
    /// The quote defaults to the text under the span. Returns `None` if the
    /// span covers nothing.
    pub fn create_inline_thread(
        &mut self,
        span: TextSpan,
        content: &str,
        quote: Option<String>,
    ) -> Result<Option<Thread>, CrdtError> {
        if span.is_empty() {
            return Ok(None);
        }
        let quote = quote
            .or_else(|| self.document.span_text(span))
            .unwrap_or_default();
        let comment = Comment::new(self.user.name.clone(), content);
        let thread = Thread::new(quote, vec![comment]);

        let wrapped = self.binding.bind_span(&mut self.document, span, &thread.id);
        if wrapped.is_empty() {
            return Ok(None);
        }
        self.store
            .add(thread.clone(), None, None, MutationSource::Local)?;
        tracing::debug!(thread_id = %thread.id, anchors = wrapped.len(), "created inline thread");
        Ok(Some(thread))
    }

    /// Append a reply to a thread.
    pub fn reply(&mut self, thread_id: &str, content: &str) -> Result<Option<Comment>, CrdtError> {
        let comment = Comment::new(self.user.name.clone(), content);
        let added = self
            .store
            .add(comment.clone(), Some(thread_id), None, MutationSource::Local)?;
        Ok(added.then_some(comment))
    }

    /// Record a suggested edit over already-present content.
    ///
    /// Each span is tagged with the suggestion's content mark of the given
    /// kind and with the suggestion thread's id. The thread opens with a
    /// summary comment.
    pub fn propose_suggestion(
        &mut self,
        kind: SuggestionKind,
        spans: &[(TextSpan, SuggestionMarkKind)],
        summary: &str,
    ) -> Result<Thread, CrdtError> {
        let id = new_id();
        self.suggestions.open(&id, kind, &self.user.id)?;

        let mut quote = String::new();
        for (span, mark) in spans {
            if let Some(text) = self.document.span_text(*span) {
                quote.push_str(&text);
            }
            self.binding
                .bind_span(&mut self.document, *span, &suggestion_mark_id(&id, *mark));
            self.binding.bind_span(&mut self.document, *span, &id);
        }

        let summary = Comment::new(self.user.name.clone(), summary)
            .with_kind(CommentKind::SuggestionSummary);
        let mut thread = Thread::new(quote, vec![summary]).with_id(id.clone());
        thread.mark_id = Some(id);
        thread.status = Some(ThreadStatus::Open);
        thread.thread_type = Some(ThreadType::Suggestion);
        self.store
            .add(thread.clone(), None, None, MutationSource::Local)?;
        Ok(thread)
    }

    pub fn update_thread(&mut self, id: &str, patch: ThreadPatch) -> Result<bool, CrdtError> {
        self.store.update_thread(id, patch, MutationSource::Local)
    }

    /// Remove a thread now and its anchors once the current edit settles.
    pub fn hide_thread(&mut self, id: &str) -> Result<bool, CrdtError> {
        if self.store.thread(id).is_none() {
            return Ok(false);
        }
        self.store.delete(id, None, MutationSource::Local)?;
        self.resolution.defer(DeferredTask::DetachThread {
            thread_id: id.into(),
        });
        Ok(true)
    }

    pub fn resolve_suggestion(&mut self, id: &str, action: ResolveAction) -> Result<bool, CrdtError> {
        self.resolution.resolve(
            id,
            action,
            &self.suggestions,
            &mut self.store,
            &mut self.binding,
            &mut self.document,
        )
    }

    /// Soft-delete a comment: it is replaced in place by its tombstone. If it
    /// was the thread's only comment the thread goes away instead.
    pub fn delete_comment(&mut self, thread_id: &str, comment_id: &str) -> Result<bool, CrdtError> {
        let Some(tombstone) = self
            .store
            .delete(comment_id, Some(thread_id), MutationSource::Local)?
        else {
            return Ok(false);
        };
        if self.store.thread(thread_id).is_some() {
            self.store.add(
                tombstone.comment,
                Some(thread_id),
                Some(tombstone.index),
                MutationSource::Local,
            )?;
        } else {
            self.resolution.defer(DeferredTask::DetachThread {
                thread_id: thread_id.into(),
            });
        }
        Ok(true)
    }

    /// Feed pending document mutations to the anchor index.
    pub fn sync_document(&mut self) {
        self.binding.sync(&mut self.document);
    }

    /// Replay remote annotation changes.
    pub fn poll_remote(&mut self) -> usize {
        self.store.poll_remote()
    }

    pub fn run_deferred(&mut self) -> usize {
        self.resolution
            .run_deferred(&self.store, &mut self.binding, &mut self.document)
    }
}
