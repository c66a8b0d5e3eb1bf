//! Health Check API Tests

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;

use crate::common::Cluster;

#[tokio::test]
async fn test_health_check_reports_pod() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let server = TestServer::new(pod.router()).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["pod_id"], "p1");
}

#[tokio::test]
async fn test_liveness_is_unconditional() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let server = TestServer::new(pod.router()).unwrap();

    let body: Value = server.get("/health/live").await.json();

    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_readiness_counts_connections() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let _client = pod.connect("u1").await;
    let server = TestServer::new(pod.router()).unwrap();

    let response = server.get("/health/ready").await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["checks"]["store"]["status"], "healthy");
    assert_eq!(body["checks"]["websocket"]["active_connections"], 1);
    assert_eq!(body["checks"]["websocket"]["connected_users"], 1);
}

#[tokio::test]
async fn test_metrics_are_exposed() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let server = TestServer::new(pod.router()).unwrap();

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    assert!(response.text().contains("ws_fanout_websocket_connections_active"));
}
