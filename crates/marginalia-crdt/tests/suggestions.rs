//! Suggestion lifecycle through editor sessions.

use marginalia_common::UserIdentity;
use marginalia_crdt::{
    AnnotationSession, ExportMode, LoroDoc, ResolveAction, SuggestionKind, SuggestionState,
    ThreadType,
};
use marginalia_editor_core::{MemoryDocument, SuggestionMarkKind, TextSpan};

fn user(id: &str) -> UserIdentity {
    UserIdentity {
        id: id.into(),
        name: id.into(),
    }
}

fn session(text: &str, who: &str) -> AnnotationSession<MemoryDocument> {
    AnnotationSession::new(MemoryDocument::from_paragraphs([text]), user(who))
}

fn exchange(from: &LoroDoc, to: &LoroDoc) {
    to.import(&from.export(ExportMode::all_updates()).unwrap())
        .unwrap();
}

/// "the old fox" with "new" typed in front of "old" and proposed as a
/// replacement.
fn replacement() -> (AnnotationSession<MemoryDocument>, String) {
    let mut s = session("the old fox", "ada");
    s.document_mut().insert_text(0, 4, "new");
    s.sync_document();
    let thread = s
        .propose_suggestion(
            SuggestionKind::Replace,
            &[
                (TextSpan::new(0, 4, 7), SuggestionMarkKind::Insert),
                (TextSpan::new(0, 7, 10), SuggestionMarkKind::Delete),
            ],
            "Replace \"old\" with \"new\"",
        )
        .unwrap();
    (s, thread.id.to_string())
}

#[test]
fn test_accepting_replace_keeps_new_text() {
    let (mut s, id) = replacement();
    assert_eq!(s.suggestions().state(&id), Some(SuggestionState::Open));

    assert!(s.resolve_suggestion(&id, ResolveAction::Accept).unwrap());
    s.run_deferred();
    insta::assert_snapshot!(s.document().render(), @"the new fox");
    assert_eq!(s.suggestions().state(&id), Some(SuggestionState::Accepted));
    assert!(s.store().annotations().is_empty());
}

#[test]
fn test_rejecting_replace_restores_old_text() {
    let (mut s, id) = replacement();
    assert!(s.resolve_suggestion(&id, ResolveAction::Reject).unwrap());
    s.run_deferred();
    insta::assert_snapshot!(s.document().render(), @"the old fox");
    assert_eq!(s.suggestions().state(&id), Some(SuggestionState::Rejected));
}

#[test]
fn test_accepting_delete_removes_text() {
    let mut s = session("the old fox", "ada");
    let thread = s
        .propose_suggestion(
            SuggestionKind::Delete,
            &[(TextSpan::new(0, 4, 8), SuggestionMarkKind::Delete)],
            "Delete \"old \"",
        )
        .unwrap();
    assert_eq!(thread.quote, "old ");
    assert!(s.resolve_suggestion(&thread.id, ResolveAction::Accept).unwrap());
    s.run_deferred();
    insta::assert_snapshot!(s.document().render(), @"the fox");
}

#[test]
fn test_resolution_is_shared_between_replicas() {
    let comments_a = LoroDoc::new();
    let comments_b = LoroDoc::new();
    let states_a = LoroDoc::new();
    let states_b = LoroDoc::new();

    let mut a = session("Hello world", "ada");
    a.attach_comments(&comments_a).unwrap();
    a.attach_suggestions(&states_a);
    let mut b = session("Hello world", "bo");
    b.attach_comments(&comments_b).unwrap();
    b.attach_suggestions(&states_b);

    a.document_mut().insert_text(0, 5, " brave");
    a.sync_document();
    let thread = a
        .propose_suggestion(
            SuggestionKind::Insert,
            &[(TextSpan::new(0, 5, 11), SuggestionMarkKind::Insert)],
            "Insert \" brave\"",
        )
        .unwrap();
    exchange(&comments_a, &comments_b);
    exchange(&states_a, &states_b);
    b.poll_remote();

    let seen = b.store().threads_by_type(ThreadType::Suggestion);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, thread.id);
    assert_eq!(seen[0].comments[0].author, "ada");
    let record = b.suggestions().get(&thread.id).unwrap();
    assert_eq!(record.state, SuggestionState::Open);
    assert_eq!(record.author_id, "ada");

    assert!(a.resolve_suggestion(&thread.id, ResolveAction::Reject).unwrap());
    exchange(&comments_a, &comments_b);
    exchange(&states_a, &states_b);
    b.poll_remote();

    assert_eq!(b.suggestions().state(&thread.id), Some(SuggestionState::Rejected));
    assert!(b.store().thread(&thread.id).is_none());
    assert!(!b.resolve_suggestion(&thread.id, ResolveAction::Accept).unwrap());
}
