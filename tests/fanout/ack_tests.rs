//! Acknowledgement outbox tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use ws_fanout::domain::{kinds, now_millis, Envelope};

use crate::common::Cluster;

fn restore(since: i64) -> Envelope {
    Envelope::new(kinds::RESTORE, json!({ "since": since }))
}

fn ack(id: &str) -> Envelope {
    Envelope::new(kinds::ACK, json!({ "id": id }))
}

#[tokio::test]
async fn test_unacked_message_is_redelivered_once_on_reconnect_then_cleared_by_ack() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;

    // Offline: retained but not delivered anywhere
    p1.gateway()
        .send_to_user("u1", Envelope::new("notice", json!("hi")).with_ack("m1"))
        .await
        .unwrap();
    assert!(cluster.has_pending("u1", "m1").await);

    let mut client = p1.connect("u1").await;
    let redelivered = client.recv().await;
    assert_eq!(redelivered.message_id(), Some("m1"));
    assert!(client.recv_within(Duration::from_millis(50)).await.is_none());

    client.send(&ack("m1"));
    tokio::time::timeout(crate::common::WAIT, async {
        while cluster.has_pending("u1", "m1").await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("ack applied");
    client.close().await;

    // Nothing left: restore answers "no message" and no sweep fires
    let mut again = p1.connect("u1").await;
    again.send(&restore(0));
    assert_eq!(again.recv().await, Envelope::no_message());
}

#[tokio::test]
async fn test_acking_twice_is_harmless() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    p1.gateway()
        .send_to_user("u1", Envelope::new("notice", json!(1)).with_ack("m1"))
        .await
        .unwrap();

    let mut client = p1.connect("u1").await;
    assert_eq!(client.recv().await.message_id(), Some("m1"));

    client.send(&ack("m1"));
    client.send(&ack("m1"));
    client.send(&restore(0));

    // No error replies: the first frame back is the restore answer
    assert_eq!(client.recv().await, Envelope::no_message());
}

#[tokio::test]
async fn test_restore_replays_pending_and_skips_expired() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let now = now_millis();

    p1.gateway()
        .send_to_user(
            "u1",
            Envelope::new("notice", json!("live"))
                .with_ack("live")
                .with_expiry(now + 60_000),
        )
        .await
        .unwrap();
    p1.gateway()
        .send_to_user(
            "u1",
            Envelope::new("notice", json!("stale"))
                .with_ack("stale")
                .with_expiry(now - 1),
        )
        .await
        .unwrap();

    let mut client = p1.connect("u1").await;
    client.send(&restore(now));

    // One copy from the reconnect sweep, one from the restore, in either order
    for _ in 0..2 {
        assert_eq!(client.recv().await.message_id(), Some("live"));
    }
    assert!(client.recv_within(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_ack_without_id_gets_error_reply() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let mut client = p1.connect("u1").await;

    client.send(&Envelope::new(kinds::ACK, json!({})));

    assert_eq!(client.recv().await.kind, kinds::ERROR);
}
