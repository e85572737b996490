//! Integration tests for the room broker
//!
//! Every client runs over an in-memory transport; `settle` is used as a
//! barrier before asserting on room membership.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomcast::broker::{Lifecycle, MemoryPeer, Transport, BEFORE_CLOSE, CLOSE};
use roomcast::{BrokerConfig, Client, Registry};
use serde_json::{json, Value};

fn registry() -> Registry {
    Registry::new(BrokerConfig::default())
}

fn connect(registry: &Registry) -> (Arc<Client>, MemoryPeer) {
    let (transport, peer) = Transport::memory();
    (registry.spawn(transport, |_, _| {}), peer)
}

async fn recv(peer: &mut MemoryPeer) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), peer.recv_text())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    serde_json::from_str(&text).unwrap()
}

async fn nothing_pending(peer: &mut MemoryPeer) -> bool {
    tokio::time::timeout(Duration::from_millis(50), peer.recv_text())
        .await
        .is_err()
}

// ============================================================================
// Rooms and scoping
// ============================================================================

#[tokio::test]
async fn test_same_room_name_yields_same_room() {
    let registry = registry();
    let first = registry.room("lobby").await.unwrap();
    let second = registry.room("lobby").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "lobby");
}

#[tokio::test]
async fn test_room_emit_reaches_members_including_sender() {
    let registry = registry();
    let (a, mut peer_a) = connect(&registry);
    let (b, mut peer_b) = connect(&registry);
    let (_c, mut peer_c) = connect(&registry);
    a.join("lobby");
    b.join("lobby");
    registry.settle().await;

    let room = registry.room("lobby").await.unwrap();
    assert_eq!(room.emit("news", json!("hello")), 2);

    for peer in [&mut peer_a, &mut peer_b] {
        let msg = recv(peer).await;
        assert_eq!(msg, json!({"event": "news", "payload": ["hello"]}));
    }
    assert!(nothing_pending(&mut peer_c).await);
}

#[tokio::test]
async fn test_in_except_scoping() {
    let registry = registry();
    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(connect(&registry));
    }
    // A = {1, 2, 3}, B = {3, 4}
    for (client, _) in &clients[0..3] {
        client.join("a");
    }
    for (client, _) in &clients[2..4] {
        client.join("b");
    }
    registry.settle().await;

    let delivered = registry.manager().in_room("a").except("b").emit("scoped", ());
    assert_eq!(delivered, 2);

    let mut peers: Vec<MemoryPeer> = clients.into_iter().map(|(_, peer)| peer).collect();
    assert_eq!(recv(&mut peers[0]).await["event"], "scoped");
    assert_eq!(recv(&mut peers[1]).await["event"], "scoped");
    assert!(nothing_pending(&mut peers[2]).await);
    assert!(nothing_pending(&mut peers[3]).await);
}

#[tokio::test]
async fn test_member_of_two_included_rooms_gets_one_copy() {
    let registry = registry();
    let (client, mut peer) = connect(&registry);
    client.join("a");
    client.join("b");
    registry.settle().await;

    let delivered = registry.manager().in_room("a").in_room("b").emit("once", ());
    assert_eq!(delivered, 1);
    recv(&mut peer).await;
    assert!(nothing_pending(&mut peer).await);
}

#[tokio::test]
async fn test_private_room_addresses_one_client() {
    let registry = registry();
    let (a, mut peer_a) = connect(&registry);
    let (_b, mut peer_b) = connect(&registry);
    registry.settle().await;

    assert_eq!(registry.to(a.id().as_str()).emit("direct", ()), 1);
    assert_eq!(recv(&mut peer_a).await["event"], "direct");
    assert!(nothing_pending(&mut peer_b).await);
}

#[tokio::test]
async fn test_broadcast_excludes_owner() {
    let registry = registry();
    let (owner, mut peer_owner) = connect(&registry);
    let (_b, mut peer_b) = connect(&registry);
    let (_c, mut peer_c) = connect(&registry);
    registry.settle().await;

    assert_eq!(owner.broadcast().emit("all-but-me", ()), 2);
    assert_eq!(recv(&mut peer_b).await["event"], "all-but-me");
    assert_eq!(recv(&mut peer_c).await["event"], "all-but-me");
    assert!(nothing_pending(&mut peer_owner).await);
}

// ============================================================================
// Listeners
// ============================================================================

#[tokio::test]
async fn test_events_before_listener_are_replayed_in_order() {
    let registry = registry();
    let (client, peer) = connect(&registry);

    peer.send_text(r#"{"event":"x","payload":[1]}"#);
    peer.send_text(r#"{"event":"x","payload":[2]}"#);

    tokio::time::timeout(Duration::from_secs(2), async {
        while client.pending_count("x") < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on("x", move |payload| {
        sink.lock().unwrap().push(payload.arg::<i64>(0).unwrap());
    });
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(client.pending_count("x"), 0);

    // the buffer is gone: a second listener sees nothing
    let late = Arc::new(Mutex::new(0));
    let counter = late.clone();
    client.on("x", move |_| *counter.lock().unwrap() += 1);
    assert_eq!(*late.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_emit_with_ack_gets_response() {
    let registry = registry();
    let (client, mut peer) = connect(&registry);

    let answer = Arc::new(Mutex::new(None));
    let slot = answer.clone();
    client.emit_with_ack("ping", (), move |payload| {
        *slot.lock().unwrap() = payload.get(0).cloned();
    });

    assert_eq!(recv(&mut peer).await["event"], "ping");
    peer.send_text(r#"{"event":"**ping:response**","payload":["pong"]}"#);

    tokio::time::timeout(Duration::from_secs(2), async {
        while answer.lock().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*answer.lock().unwrap(), Some(json!("pong")));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_removes_client_everywhere() {
    let registry = registry();
    let (client, _peer) = connect(&registry);
    client.join("lobby");
    registry.settle().await;

    client.close();
    client.closed().await;

    assert_eq!(client.lifecycle(), Lifecycle::Closed);
    assert!(!registry.contains_client(client.id().as_str()));
    assert!(!registry.get_room("lobby").unwrap().contains_client(client.id().as_str()));
    assert!(client.rooms().is_empty());
}

#[tokio::test]
async fn test_lifecycle_events_fire_once_in_order() {
    let registry = registry();
    let (client, _peer) = connect(&registry);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for event in [BEFORE_CLOSE, CLOSE] {
        let sink = seen.clone();
        client.on(event, move |_| sink.lock().unwrap().push(event));
    }

    client.close();
    client.close();
    client.closed().await;
    client.close();

    assert_eq!(*seen.lock().unwrap(), vec![BEFORE_CLOSE, CLOSE]);
}

#[tokio::test]
async fn test_peer_hang_up_runs_close_cascade() {
    let registry = registry();
    let (client, peer) = connect(&registry);
    client.join("lobby");
    registry.settle().await;

    peer.hang_up();
    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .unwrap();

    assert!(!client.is_alive());
    assert!(!registry.contains_client(client.id().as_str()));
}

#[tokio::test]
async fn test_closed_client_is_skipped_by_room_emit() {
    let registry = registry();
    let (a, _peer_a) = connect(&registry);
    let (b, mut peer_b) = connect(&registry);
    a.join("lobby");
    b.join("lobby");
    registry.settle().await;

    a.close();
    a.closed().await;

    assert_eq!(registry.to("lobby").emit("after", ()), 1);
    assert_eq!(recv(&mut peer_b).await["event"], "after");
}
