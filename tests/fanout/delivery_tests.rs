//! Cross-pod delivery tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use ws_fanout::domain::{Envelope, PresenceRegistry};

use crate::common::Cluster;

#[tokio::test]
async fn test_send_from_other_pod_is_published_once_and_delivered() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let p2 = cluster.pod("p2").await;
    let mut client = p1.connect("u1").await;

    p2.gateway()
        .send_to_user("u1", Envelope::new("chat", json!({"text": "hello"})))
        .await
        .unwrap();

    assert_eq!(cluster.broker.published("ws.send.p1").len(), 1);
    assert!(cluster.broker.published("ws.send.p2").is_empty());

    let received = client.recv().await;
    assert_eq!(received.kind, "chat");
    assert_eq!(received.user_id.as_deref(), Some("u1"));
    assert_eq!(received.payload, json!({"text": "hello"}));
    assert!(client.recv_within(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_offline_user_is_a_silent_no_op() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let _p2 = cluster.pod("p2").await;

    p1.gateway()
        .send_to_user("u1", Envelope::new("chat", json!("hi")))
        .await
        .unwrap();

    assert_eq!(cluster.broker.publish_count(), 0);
    assert_eq!(p1.gateway().connection_count(), 0);
}

#[tokio::test]
async fn test_same_pod_delivery_skips_the_broker() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let mut client = p1.connect("u1").await;

    p1.gateway()
        .send_to_user("u1", Envelope::new("chat", json!("local")))
        .await
        .unwrap();

    assert_eq!(client.recv().await.payload, json!("local"));
    assert_eq!(cluster.broker.publish_count(), 0);
}

#[tokio::test]
async fn test_user_on_two_pods_gets_one_copy_per_connection() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let p2 = cluster.pod("p2").await;
    let mut on_p1 = p1.connect("u1").await;
    let mut on_p2 = p2.connect("u1").await;

    p1.gateway()
        .send_to_user("u1", Envelope::new("chat", json!("both")))
        .await
        .unwrap();

    assert_eq!(on_p1.recv().await.payload, json!("both"));
    assert_eq!(on_p2.recv().await.payload, json!("both"));
    assert_eq!(cluster.broker.published("ws.send.p2").len(), 1);
    assert!(on_p1.recv_within(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_disconnect_withdraws_presence() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let client = p1.connect("u1").await;
    assert_eq!(p1.state.presence.get_user_pods("u1").await.unwrap(), vec!["p1".to_string()]);

    client.close().await;

    assert!(p1.state.presence.get_user_pods("u1").await.unwrap().is_empty());
    assert_eq!(p1.gateway().connection_count(), 0);
}

#[tokio::test]
async fn test_presence_survives_while_another_connection_remains() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let first = p1.connect("u1").await;
    let _second = p1.connect("u1").await;

    first.close().await;

    assert_eq!(p1.state.presence.get_user_pods("u1").await.unwrap(), vec!["p1".to_string()]);
}

#[tokio::test]
async fn test_inbound_frames_reach_registered_handlers() {
    let cluster = Cluster::new();
    let router = ws_fanout::presentation::websocket::MessageRouter::new().register_raw(
        "echo",
        |conn, payload| async move { conn.reply(&Envelope::new("echo", payload)) },
    );
    let p1 = cluster
        .pod_with("p1", crate::common::settings(), router)
        .await;
    let mut client = p1.connect("u1").await;

    client.send(&Envelope::new("echo", json!({"n": 7})));

    assert_eq!(client.recv().await, Envelope::new("echo", json!({"n": 7})));
}

#[tokio::test]
async fn test_inbound_rate_limit_drops_excess_frames() {
    let cluster = Cluster::new();
    let mut settings = crate::common::settings();
    settings.rate_limit.limit = 2;
    let router = ws_fanout::presentation::websocket::MessageRouter::new().register_raw(
        "echo",
        |conn, payload| async move { conn.reply(&Envelope::new("echo", payload)) },
    );
    let p1 = cluster.pod_with("p1", settings, router).await;
    let mut client = p1.connect("u1").await;

    for n in 0..3 {
        client.send(&Envelope::new("echo", json!(n)));
    }

    assert_eq!(client.recv().await.payload, json!(0));
    assert_eq!(client.recv().await.payload, json!(1));
    assert!(client.recv_within(Duration::from_millis(100)).await.is_none());
}
