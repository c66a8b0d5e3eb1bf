//! Upgrade admission tests
//!
//! These requests carry no upgrade headers, so any request that passes
//! admission ends in the upgrade rejection rather than a socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

use crate::common::{settings, token, Cluster};
use ws_fanout::presentation::websocket::MessageRouter;
use ws_fanout::startup::build_router;

fn upgrade_request(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

#[tokio::test]
async fn test_upgrade_without_token_is_unauthorized() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;

    let response = pod
        .router()
        .oneshot(upgrade_request("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_query_token_passes_admission() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;

    let response = pod
        .router()
        .oneshot(
            upgrade_request(&format!("/ws?token={}", token("u1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    assert_ne!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unlisted_origin_is_forbidden() {
    let cluster = Cluster::new();
    let mut settings = settings();
    settings.websocket.allowed_origins = vec!["https://app.example".into()];
    let pod = cluster.pod_with("p1", settings, MessageRouter::new()).await;

    let response = pod
        .router()
        .oneshot(
            upgrade_request("/ws")
                .header(header::ORIGIN, "https://evil.example")
                .header(header::AUTHORIZATION, format!("Bearer {}", token("u1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_ip_filter_rejects_peer() {
    let cluster = Cluster::new();
    let pod = cluster.pod("p1").await;
    let blocked = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
    let state = pod.state.clone().with_ip_filter(move |ip| ip != blocked);

    let response = build_router(state)
        .oneshot(
            upgrade_request("/ws")
                .extension(ConnectInfo(SocketAddr::new(blocked, 40000)))
                .header(header::AUTHORIZATION, format!("Bearer {}", token("u1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
