//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Key-value stores (Redis, in-memory)
//! - Message brokers (Redis Streams, in-memory)
//! - Prometheus metrics

pub mod broker;
pub mod cache;
pub mod metrics;
