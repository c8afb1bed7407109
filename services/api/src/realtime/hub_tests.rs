use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::realtime::hub::{Hub, HubConfig, HubHandle, SessionHandle, SessionKey};
use crate::web::protocol::{ChatFrame, FrameKind};

fn frame(community_id: i64, id: Option<i64>, content: &str) -> ChatFrame {
    ChatFrame {
        kind: FrameKind::Text,
        id,
        community_id,
        sender_id: 7,
        content: content.to_string(),
        file_url: None,
        file_id: None,
        timestamp: Utc::now(),
    }
}

fn start() -> HubHandle {
    let (handle, _task) = Hub::spawn(HubConfig::default(), CancellationToken::new());
    handle
}

async fn attach(hub: &HubHandle, user_id: i64, community_id: i64, capacity: usize) -> (SessionKey, mpsc::Receiver<Utf8Bytes>) {
    let (tx, rx) = mpsc::channel(capacity);
    let session = SessionHandle::new(hub.next_session_id(), user_id, community_id, tx);
    let key = session.key();
    assert!(hub.register(session).await);
    (key, rx)
}

async fn wait_for_count(hub: &HubHandle, community_id: i64, expected: usize) {
    timeout(Duration::from_secs(1), async {
        while hub.client_count(community_id).await != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("community {community_id} never reached {expected} sessions"));
}

async fn next_frame(rx: &mut mpsc::Receiver<Utf8Bytes>) -> ChatFrame {
    let payload = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("expected a frame within timeout")
        .expect("queue open");
    serde_json::from_str(payload.as_str()).expect("valid frame json")
}

#[tokio::test]
async fn frames_reach_only_their_own_community() {
    let hub = start();
    let (_, mut in_42) = attach(&hub, 7, 42, 16).await;
    let (_, mut in_1) = attach(&hub, 9, 1, 16).await;
    wait_for_count(&hub, 42, 1).await;
    wait_for_count(&hub, 1, 1).await;

    hub.publish(frame(42, Some(1), "hello 42")).await;

    assert_eq!(next_frame(&mut in_42).await.content, "hello 42");
    let unexpected = timeout(Duration::from_millis(50), in_1.recv()).await;
    assert!(unexpected.is_err(), "community 1 received a frame for community 42");
}

#[tokio::test]
async fn pending_frames_go_to_listeners_only() {
    let hub = start();
    let (_, mut listener) = hub.add_listener(16).await;
    let (_, mut session) = attach(&hub, 7, 42, 16).await;
    wait_for_count(&hub, 42, 1).await;

    hub.publish(frame(42, None, "unsaved")).await;

    let tapped = timeout(Duration::from_millis(500), listener.recv())
        .await
        .expect("listener should see the frame")
        .expect("listener open");
    assert_eq!(tapped.content, "unsaved");
    assert!(timeout(Duration::from_millis(50), session.recv()).await.is_err());

    hub.publish(frame(42, Some(3), "saved")).await;
    assert_eq!(next_frame(&mut session).await.id, Some(3));
    assert_eq!(listener.recv().await.expect("listener open").id, Some(3));
}

#[tokio::test]
async fn every_session_observes_the_same_order() {
    let hub = start();
    let (_, mut a) = attach(&hub, 7, 42, 256).await;
    let (_, mut b) = attach(&hub, 8, 42, 256).await;
    wait_for_count(&hub, 42, 2).await;

    for i in 1..=100 {
        hub.publish(frame(42, Some(i), &format!("m{i}"))).await;
    }

    for i in 1..=100 {
        assert_eq!(next_frame(&mut a).await.id, Some(i));
        assert_eq!(next_frame(&mut b).await.id, Some(i));
    }
}

#[tokio::test]
async fn slow_sessions_are_evicted_without_stalling_peers() {
    let hub = start();
    let (_, mut fast) = attach(&hub, 7, 42, 256).await;
    let (_, mut slow) = attach(&hub, 8, 42, 4).await;
    wait_for_count(&hub, 42, 2).await;

    for i in 1..=10 {
        hub.publish(frame(42, Some(i), "burst")).await;
    }

    for i in 1..=10 {
        assert_eq!(next_frame(&mut fast).await.id, Some(i));
    }
    wait_for_count(&hub, 42, 1).await;

    // The slow queue holds what fit before eviction, then reports closed.
    let mut drained = 0;
    while timeout(Duration::from_millis(200), slow.recv())
        .await
        .expect("slow queue should be closed")
        .is_some()
    {
        drained += 1;
    }
    assert_eq!(drained, 4);
}

#[tokio::test]
async fn unregister_closes_the_outbound_queue() {
    let hub = start();
    let (key, mut rx) = attach(&hub, 7, 42, 16).await;
    wait_for_count(&hub, 42, 1).await;

    hub.unregister(key).await;
    wait_for_count(&hub, 42, 0).await;

    let closed = timeout(Duration::from_millis(500), rx.recv()).await.expect("recv should resolve");
    assert!(closed.is_none());
}

#[tokio::test]
async fn evicting_a_user_drops_all_their_sessions_in_that_community() {
    let hub = start();
    let (_, mut first) = attach(&hub, 7, 42, 16).await;
    let (_, mut second) = attach(&hub, 7, 42, 16).await;
    let (_, mut other_user) = attach(&hub, 8, 42, 16).await;
    let (_, mut elsewhere) = attach(&hub, 7, 43, 16).await;
    wait_for_count(&hub, 42, 3).await;
    wait_for_count(&hub, 43, 1).await;

    hub.evict_user(42, 7).await;
    wait_for_count(&hub, 42, 1).await;

    assert!(first.recv().await.is_none());
    assert!(second.recv().await.is_none());
    assert_eq!(hub.client_count(43).await, 1);

    hub.publish(frame(42, Some(1), "still here")).await;
    hub.publish(frame(43, Some(2), "other room")).await;
    assert_eq!(next_frame(&mut other_user).await.id, Some(1));
    assert_eq!(next_frame(&mut elsewhere).await.id, Some(2));
}

#[tokio::test]
async fn closing_a_community_drops_only_its_sessions() {
    let hub = start();
    let (_, mut a) = attach(&hub, 7, 42, 16).await;
    let (_, mut b) = attach(&hub, 8, 42, 16).await;
    let (_, mut other) = attach(&hub, 7, 43, 16).await;
    wait_for_count(&hub, 42, 2).await;
    wait_for_count(&hub, 43, 1).await;

    hub.close_community(42).await;
    wait_for_count(&hub, 42, 0).await;

    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
    hub.publish(frame(43, Some(1), "unaffected")).await;
    assert_eq!(next_frame(&mut other).await.id, Some(1));
}

#[tokio::test]
async fn full_listener_is_skipped_and_routing_continues() {
    let hub = start();
    let (_, mut tiny) = hub.add_listener(1).await;
    let (_, mut session) = attach(&hub, 7, 42, 16).await;
    wait_for_count(&hub, 42, 1).await;

    hub.publish(frame(42, Some(1), "one")).await;
    hub.publish(frame(42, Some(2), "two")).await;

    assert_eq!(next_frame(&mut session).await.id, Some(1));
    assert_eq!(next_frame(&mut session).await.id, Some(2));
    assert_eq!(tiny.recv().await.expect("listener open").id, Some(1));
    assert!(timeout(Duration::from_millis(50), tiny.recv()).await.is_err());
}

#[tokio::test]
async fn shutdown_closes_every_session_queue() {
    let shutdown = CancellationToken::new();
    let (hub, task) = Hub::spawn(HubConfig::default(), shutdown.clone());
    let (_, mut a) = attach(&hub, 7, 42, 16).await;
    let (_, mut b) = attach(&hub, 8, 43, 16).await;
    wait_for_count(&hub, 42, 1).await;
    wait_for_count(&hub, 43, 1).await;

    hub.shutdown();
    timeout(Duration::from_secs(1), task).await.expect("hub stops").expect("hub task");

    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
    assert!(hub.is_shutting_down());
    assert!(!hub.register(SessionHandle::new(99, 1, 1, mpsc::channel(1).0)).await);
}
