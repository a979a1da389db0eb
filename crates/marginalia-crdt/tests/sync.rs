//! Replica connections against the in-process sync server.

use std::sync::Arc;
use std::time::Duration;

use marginalia_common::transport::MemoryHub;
use marginalia_common::{CollabConfig, StaticCredentials};
use marginalia_crdt::{
    AnnotationStore, Channel, Comment, ConnectionDeps, ConnectionEvent, ConnectionStatus, ExportMode,
    LoroDoc, MemoryCache, MutationSource, ReplicaConnection, Thread, claim_bootstrap,
};
use tokio::sync::mpsc::UnboundedReceiver;

const TIMEOUT: Duration = Duration::from_secs(5);

fn deps(hub: &MemoryHub, cache: &MemoryCache, token: &str) -> ConnectionDeps {
    ConnectionDeps::new(
        CollabConfig::default(),
        Arc::new(StaticCredentials::new(token, "mem://hub")),
        Arc::new(hub.clone()),
        Arc::new(cache.clone()),
    )
}

fn connect(channel: Channel, deps: ConnectionDeps) -> (ReplicaConnection, UnboundedReceiver<ConnectionEvent>) {
    let mut connection = ReplicaConnection::connect("doc-1", None, channel, LoroDoc::new(), deps);
    let events = connection.take_events().unwrap();
    (connection, events)
}

/// Wait for the first event `pick` accepts, skipping the others.
async fn wait_for<T>(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    pick: impl Fn(&ConnectionEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if let Some(found) = pick(&event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for connection event")
}

async fn first_sync(events: &mut UnboundedReceiver<ConnectionEvent>) -> bool {
    wait_for(events, |e| match e {
        ConnectionEvent::FirstSyncCompleted { is_first_ever_sync } => Some(*is_first_ever_sync),
        _ => None,
    })
    .await
}

async fn remote_update(events: &mut UnboundedReceiver<ConnectionEvent>) {
    wait_for(events, |e| matches!(e, ConnectionEvent::RemoteUpdate).then_some(())).await
}

async fn until_stored(hub: &MemoryHub, room: &str, count: usize) {
    tokio::time::timeout(TIMEOUT, async {
        while hub.updates(room).len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("hub never received the update");
}

#[tokio::test]
async fn test_first_replica_bootstraps_and_second_receives() {
    let hub = MemoryHub::new();
    let cache = MemoryCache::new();

    let (a, mut a_events) = connect(Channel::Document, deps(&hub, &cache, "tok"));
    assert!(first_sync(&mut a_events).await);
    assert!(a.status().is_connected());
    assert!(claim_bootstrap(a.doc()).unwrap());
    a.doc().get_text("body").insert(0, "hello").unwrap();
    a.doc().commit();
    until_stored(&hub, "doc-1", 2).await;

    let (b, mut b_events) = connect(Channel::Document, deps(&hub, &MemoryCache::new(), "tok"));
    assert!(!first_sync(&mut b_events).await);
    assert!(!claim_bootstrap(b.doc()).unwrap());
    assert_eq!(b.doc().get_text("body").to_string(), "hello");

    b.doc().get_text("body").insert(5, " world").unwrap();
    b.doc().commit();
    remote_update(&mut a_events).await;
    assert_eq!(a.doc().get_text("body").to_string(), "hello world");
}

#[tokio::test]
async fn test_cached_replica_loads_while_offline() {
    let hub = MemoryHub::new();
    let cache = MemoryCache::new();

    let (mut a, mut a_events) = connect(Channel::Document, deps(&hub, &cache, "tok"));
    first_sync(&mut a_events).await;
    a.doc().get_text("body").insert(0, "draft").unwrap();
    a.doc().commit();
    a.disconnect().await;
    assert_eq!(a.status(), ConnectionStatus::Disconnected);
    assert!(cache.get("doc-1-v1").is_some());

    hub.set_online(false);
    let (c, mut c_events) = connect(Channel::Document, deps(&hub, &cache, "tok"));
    wait_for(&mut c_events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. }).then_some(())
    })
    .await;
    assert!(c.status().is_local_only());
    assert_eq!(c.doc().get_text("body").to_string(), "draft");
}

#[tokio::test]
async fn test_rejected_token_falls_back_to_local_only() {
    let hub = MemoryHub::new();
    hub.allow_token("good");

    let (c, mut events) = connect(Channel::Comments, deps(&hub, &MemoryCache::new(), "bad"));
    let reason = wait_for(&mut events, |e| match e {
        ConnectionEvent::AuthenticationFailed { reason } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert_eq!(reason, "invalid token");
    assert_eq!(
        c.status(),
        ConnectionStatus::LocalOnly {
            reason: "invalid token".into()
        }
    );

    // The replica keeps working without a server.
    let mut store = AnnotationStore::new();
    store.attach(c.doc()).unwrap();
    let thread = Thread::new("q", vec![Comment::new("ada", "still here")]);
    assert!(store.add(thread, None, None, MutationSource::Local).unwrap());
}

#[tokio::test]
async fn test_comments_flow_between_connected_stores() {
    let hub = MemoryHub::new();
    let (a, mut a_events) = connect(Channel::Comments, deps(&hub, &MemoryCache::new(), "tok"));
    let (b, mut b_events) = connect(Channel::Comments, deps(&hub, &MemoryCache::new(), "tok"));
    first_sync(&mut a_events).await;
    first_sync(&mut b_events).await;
    assert_eq!(a.name(), "doc-1/comments");

    let mut store_a = AnnotationStore::new();
    let mut store_b = AnnotationStore::new();
    store_a.attach(a.doc()).unwrap();
    store_b.attach(b.doc()).unwrap();

    let thread = Thread::new("quote", vec![Comment::new("ada", "look here")]);
    store_a
        .add(thread.clone(), None, None, MutationSource::Local)
        .unwrap();
    remote_update(&mut b_events).await;
    assert_eq!(store_b.poll_remote(), 1);
    assert_eq!(store_b.thread(&thread.id), Some(&thread));
    assert_eq!(hub.updates("doc-1/comments").len(), 1);
}

#[tokio::test]
async fn test_reconnect_resyncs_offline_edits() {
    let hub = MemoryHub::new();
    let cache = MemoryCache::new();
    let (mut a, mut a_events) = connect(Channel::Document, deps(&hub, &cache, "tok"));
    first_sync(&mut a_events).await;

    hub.set_online(false);
    wait_for(&mut a_events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. }).then_some(())
    })
    .await;
    a.doc().get_text("body").insert(0, "offline edit").unwrap();
    a.doc().commit();

    hub.set_online(true);
    a.reconnect().await;
    wait_for(&mut a_events, |e| matches!(e, ConnectionEvent::Synced).then_some(())).await;
    assert!(a.status().is_connected());
    until_stored(&hub, "doc-1", 1).await;

    let (b, mut b_events) = connect(Channel::Document, deps(&hub, &MemoryCache::new(), "tok"));
    first_sync(&mut b_events).await;
    assert_eq!(b.doc().get_text("body").to_string(), "offline edit");
}

#[tokio::test]
async fn test_cached_thread_is_not_a_first_ever_sync() {
    let hub = MemoryHub::new();
    let cache = MemoryCache::new();

    let seeded = LoroDoc::new();
    let mut store = AnnotationStore::new();
    store.attach(&seeded).unwrap();
    let thread = Thread::new("cached", vec![Comment::new("ada", "from last session")]);
    store
        .add(thread.clone(), None, None, MutationSource::Local)
        .unwrap();
    cache.insert(
        CollabConfig::default().cache_key("doc-1/comments"),
        seeded.export(ExportMode::Snapshot).unwrap(),
    );

    let (c, mut events) = connect(Channel::Comments, deps(&hub, &cache, "tok"));
    assert!(!first_sync(&mut events).await);
    assert_eq!(c.doc().get_list("comments").len(), 1);

    let mut restored = AnnotationStore::new();
    restored.attach(c.doc()).unwrap();
    assert_eq!(restored.thread(&thread.id), Some(&thread));
}

#[tokio::test]
async fn test_empty_cache_and_room_is_a_first_ever_sync() {
    let hub = MemoryHub::new();
    let (c, mut events) = connect(Channel::Comments, deps(&hub, &MemoryCache::new(), "tok"));
    assert!(first_sync(&mut events).await);
    assert!(c.doc().get_list("comments").is_empty());
}
