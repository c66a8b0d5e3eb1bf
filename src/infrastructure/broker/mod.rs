//! Broker Module
//!
//! Topic-based transport between pods. Every pod consumes exactly one
//! topic named after its own id (see [`keys::pod_topic`]) and publishes to
//! the topics of the pods that hold a target user's sockets.
//!
//! - `RedisStreamBroker`: Redis Streams with one consumer group per topic.
//!   Entries are acknowledged with XACK only after the handler succeeded,
//!   so a pod that crashes mid-delivery gets the entry again on restart.
//! - `MemoryBroker`: in-process delivery for single-pod setups and tests.
//!
//! [`keys::pod_topic`]: crate::infrastructure::cache::keys::pod_topic

mod memory;
mod redis_stream;

pub use memory::MemoryBroker;
pub use redis_stream::RedisStreamBroker;

/// Stream field holding the message bytes.
pub(crate) const PAYLOAD_FIELD: &str = "payload";
