//! Presence API Tests

use axum::http::StatusCode;
use axum_test::TestServer;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crate::common::{token, Cluster};

#[tokio::test]
async fn test_presence_requires_token() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let server = TestServer::new(pod.router()).unwrap();

    server
        .get("/api/v1/presence/users")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_lists_users_across_pods() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let p2 = cluster.pod("p2").await;
    let _a = p1.connect("alice").await;
    let _b = p2.connect("bob").await;
    let server = TestServer::new(p1.router()).unwrap();

    let body: Value = server
        .get("/api/v1/presence/users")
        .authorization_bearer(token("admin"))
        .await
        .json();

    assert_eq!(body, json!({"users": ["alice", "bob"], "count": 2}));
}

#[tokio::test]
async fn test_user_presence_lists_pods() {
    let cluster = Cluster::new();
    let p1 = cluster.pod("p1").await;
    let p2 = cluster.pod("p2").await;
    let _a = p1.connect("alice").await;
    let _b = p2.connect("alice").await;
    let server = TestServer::new(p1.router()).unwrap();

    let online: Value = server
        .get("/api/v1/presence/users/alice")
        .authorization_bearer(token("admin"))
        .await
        .json();
    let offline: Value = server
        .get("/api/v1/presence/users/carol")
        .authorization_bearer(token("admin"))
        .await
        .json();

    assert_eq!(online, json!({"user_id": "alice", "online": true, "pods": ["p1", "p2"]}));
    assert_eq!(offline, json!({"user_id": "carol", "online": false, "pods": []}));
}
