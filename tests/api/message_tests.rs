//! Server Push API Tests

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use crate::common::{token, Cluster};

#[tokio::test]
async fn test_push_reaches_user_on_another_pod() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let p2 = cluster.pod("p2").await;
    let mut client = p2.connect("u1").await;
    let server = TestServer::new(p1.router()).unwrap();

    let response = server
        .post("/api/v1/users/u1/messages")
        .authorization_bearer(token("backend"))
        .json(&json!({"type": "notice", "payload": {"text": "deploy done"}}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let received = client.recv().await;
    assert_eq!(received.kind, "notice");
    assert_eq!(received.payload, json!({"text": "deploy done"}));
    assert_eq!(cluster.broker.published("ws.send.p2").len(), 1);
}

#[tokio::test]
async fn test_push_with_ack_is_retained_for_offline_user() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let server = TestServer::new(p1.router()).unwrap();

    let response = server
        .post("/api/v1/users/u1/messages")
        .authorization_bearer(token("backend"))
        .json(&json!({"type": "notice", "requiresAck": true, "id": "m7"}))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["id"], "m7");
    assert!(cluster.has_pending("u1", "m7").await);
}

#[tokio::test]
async fn test_push_rejects_invalid_body() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let server = TestServer::new(p1.router()).unwrap();

    let response = server
        .post("/api/v1/users/u1/messages")
        .authorization_bearer(token("backend"))
        .json(&json!({"type": "", "payload": 1}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_push_rejects_bad_token() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let server = TestServer::new(p1.router()).unwrap();

    server
        .post("/api/v1/users/u1/messages")
        .authorization_bearer("not-a-jwt")
        .json(&json!({"type": "notice"}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
