//! Prometheus Metrics Module
//!
//! Provides pod-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauge
//! - Deliveries by route (`local` hub enqueue, `remote` broker publish)
//! - Dropped messages by reason (`backpressure`, `rate_limited`, `malformed`)
//! - Acknowledgement outbox redeliveries

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "ws_fanout";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections on this pod
pub static WEBSOCKET_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "websocket_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create WEBSOCKET_CONNECTIONS_ACTIVE metric")
});

/// Deliveries by route
pub static MESSAGES_DELIVERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_delivered_total", "Messages handed to a delivery route")
            .namespace(NAMESPACE),
        &["route"], // "local", "remote"
    )
    .expect("Failed to create MESSAGES_DELIVERED_TOTAL metric")
});

/// Dropped messages by reason
pub static MESSAGES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_dropped_total", "Messages dropped before delivery")
            .namespace(NAMESPACE),
        &["reason"],
    )
    .expect("Failed to create MESSAGES_DROPPED_TOTAL metric")
});

/// Outbox entries redelivered by the retry sweep or a restore request
pub static ACK_REDELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "ack_redeliveries_total",
            "Unacknowledged messages delivered again",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create ACK_REDELIVERIES_TOTAL metric")
});

/// Reasons a message is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Connection buffer full
    Backpressure,
    /// Inbound frame over the user's budget
    RateLimited,
    /// Inbound frame that is not a valid envelope
    Malformed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Backpressure => "backpressure",
            DropReason::RateLimited => "rate_limited",
            DropReason::Malformed => "malformed",
        }
    }
}

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(WEBSOCKET_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register WEBSOCKET_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_DELIVERED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_DELIVERED_TOTAL");
    registry
        .register(Box::new(MESSAGES_DROPPED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_DROPPED_TOTAL");
    registry
        .register(Box::new(ACK_REDELIVERIES_TOTAL.clone()))
        .expect("Failed to register ACK_REDELIVERIES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to update the active connection gauge
pub fn set_websocket_connections(active: usize) {
    WEBSOCKET_CONNECTIONS_ACTIVE.set(active as i64);
}

pub fn record_local_delivery() {
    MESSAGES_DELIVERED_TOTAL.with_label_values(&["local"]).inc();
}

pub fn record_remote_delivery() {
    MESSAGES_DELIVERED_TOTAL.with_label_values(&["remote"]).inc();
}

pub fn record_drop(reason: DropReason) {
    MESSAGES_DROPPED_TOTAL
        .with_label_values(&[reason.as_str()])
        .inc();
}

pub fn record_redelivery() {
    ACK_REDELIVERIES_TOTAL.inc();
}
