//! Threads stay attached to their text while the document is edited.

use marginalia_common::UserIdentity;
use marginalia_crdt::AnnotationSession;
use marginalia_editor_core::{AnchorDocument, MemoryDocument, TextSpan};

fn session(text: &str) -> AnnotationSession<MemoryDocument> {
    AnnotationSession::new(
        MemoryDocument::from_paragraphs([text]),
        UserIdentity {
            id: "u1".into(),
            name: "ada".into(),
        },
    )
}

#[test]
fn test_thread_survives_split_and_merge() {
    let mut s = session("the quick brown fox");
    let thread = s
        .create_inline_thread(TextSpan::new(0, 4, 15), "speed?", None)
        .unwrap()
        .unwrap();
    assert_eq!(s.binding().nodes_for(&thread.id).len(), 1);

    s.document_mut().split_block(0, 10);
    s.sync_document();
    assert_eq!(s.document().block_count(), 2);
    assert_eq!(s.binding().nodes_for(&thread.id).len(), 2);
    insta::assert_snapshot!(s.document().render().replace(thread.id.as_str(), "t1"), @r"
    the [t1|quick ]
    [t1|brown] fox
    ");

    s.document_mut().merge_blocks(0);
    s.sync_document();
    assert_eq!(s.binding().nodes_for(&thread.id).len(), 1);
    assert_eq!(
        s.document().render(),
        format!("the [{}|quick brown] fox", thread.id)
    );
}

#[test]
fn test_overlapping_threads_track_independently() {
    let mut s = session("one two three");
    let first = s
        .create_inline_thread(TextSpan::new(0, 0, 7), "a", None)
        .unwrap()
        .unwrap();
    let second = s
        .create_inline_thread(TextSpan::new(0, 4, 13), "b", None)
        .unwrap()
        .unwrap();
    assert_eq!(first.quote, "one two");
    assert_eq!(second.quote, "two three");
    assert_eq!(s.document().anchors().len(), 3);

    assert!(s.hide_thread(&first.id).unwrap());
    s.run_deferred();
    assert!(!s.binding().is_bound(&first.id));
    assert_eq!(s.binding().nodes_for(&second.id).len(), 1);
    insta::assert_snapshot!(
        s.document().render().replace(second.id.as_str(), "t2"),
        @"one [t2|two three]"
    );
}

#[test]
fn test_deleting_anchored_text_unbinds_thread() {
    let mut s = session("keep this gone");
    let thread = s
        .create_inline_thread(TextSpan::new(0, 10, 14), "remove?", None)
        .unwrap()
        .unwrap();
    s.document_mut().delete_text(TextSpan::new(0, 9, 14));
    s.sync_document();
    assert!(!s.binding().is_bound(&thread.id));
    // The thread itself is still listed until someone removes it.
    assert!(s.store().thread(&thread.id).is_some());
}
