//! Cache Module
//!
//! Key-value store implementations backing presence, the acknowledgement
//! outbox and the rate limiter.
//!
//! This module provides:
//! - Redis connection management with automatic reconnection
//! - `RedisStore`, the production `KeyValueStore`
//! - `MemoryStore`, a single-process `KeyValueStore` with TTL support
//! - Key builders for consistent key naming across pods
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------+
//! | PresenceRegistry | AckStore | RateLimiter   |
//! +---------------------------------------------+
//!          |
//!          v
//! +-------------------+
//! | KeyValueStore     |  <-- Abstract interface
//! +-------------------+
//!          |
//!          v
//! +-------------------+     +-------------------+
//! |   RedisStore      |     |   MemoryStore     |
//! +-------------------+     +-------------------+
//!          |
//!          v
//! +-------------------+
//! | ConnectionManager |
//! +-------------------+
//! ```

mod memory_store;
mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

use crate::config::RedisSettings;

/// Creates a Redis connection manager with automatic reconnection.
///
/// The connection manager multiplexes commands over one connection and
/// reconnects transparently when the connection is lost.
///
/// # Errors
/// Returns the driver error if the URL is invalid or the server is unreachable.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}

/// Key and topic builders.
///
/// Every pod must derive identical names from the same inputs, so all
/// naming goes through these helpers.
///
/// # Example
/// ```rust,ignore
/// use ws_fanout::infrastructure::cache::keys;
///
/// assert_eq!(keys::presence("ws", "u1"), "ws:user:u1");
/// assert_eq!(keys::pod_topic("ws.send", "p1"), "ws.send.p1");
/// ```
pub mod keys {
    /// Presence set of a user (`<namespace>:user:<user_id>`)
    #[inline]
    pub fn presence(namespace: &str, user_id: &str) -> String {
        format!("{}:user:{}", namespace, user_id)
    }

    /// Prefix shared by every presence key of a namespace
    #[inline]
    pub fn presence_prefix(namespace: &str) -> String {
        format!("{}:user:", namespace)
    }

    /// Scan pattern matching every presence key of a namespace
    #[inline]
    pub fn presence_pattern(namespace: &str) -> String {
        format!("{}*", escape_glob(&presence_prefix(namespace)))
    }

    /// Outbox entry of one message (`<prefix>:<user_id>:<message_id>`)
    #[inline]
    pub fn ack(prefix: &str, user_id: &str, message_id: &str) -> String {
        format!("{}:{}:{}", prefix, user_id, message_id)
    }

    /// Scan pattern matching every outbox entry of a user
    #[inline]
    pub fn ack_pattern(prefix: &str, user_id: &str) -> String {
        format!("{}:{}:*", escape_glob(prefix), escape_glob(user_id))
    }

    /// Rate limit counter of a user (`<prefix>:<user_id>`)
    #[inline]
    pub fn rate_limit(prefix: &str, user_id: &str) -> String {
        format!("{}:{}", prefix, user_id)
    }

    /// Broker topic consumed by exactly one pod (`<prefix>.<pod_id>`)
    #[inline]
    pub fn pod_topic(prefix: &str, pod_id: &str) -> String {
        format!("{}.{}", prefix, pod_id)
    }

    /// Escape glob metacharacters so ids are matched literally.
    pub fn escape_glob(raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        escaped
    }
}
