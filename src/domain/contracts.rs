//! Collaborator contracts.
//!
//! Traits for everything the fan-out core talks to across a process or
//! network boundary. Implementations live in the infrastructure layer
//! (Redis, in-memory) and in the application services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::shared::error::AppError;

/// Key-value store with the atomic primitives the core relies on.
///
/// All mutation of presence, acknowledgement and rate-limit state goes
/// through these calls; callers never hold a lock across them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Add `member` to the set at `key`, creating the set if absent.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), AppError>;

    /// Remove `member` from the set at `key`. An emptied set disappears.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), AppError>;

    /// All members of the set at `key` (empty when missing).
    async fn set_members(&self, key: &str) -> Result<Vec<String>, AppError>;

    /// Set a time-to-live on an existing key; `false` when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, AppError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError>;

    /// Increment the counter at `key` (missing keys start at 0) and return the
    /// new value. A counter without an expiry gets `ttl` in the same atomic
    /// step; an expiry already running is left alone.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError>;

    /// Delete `key`; `false` when it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Keys matching a glob `pattern` (only `*` and `\` escapes are meaningful).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, AppError>;

    /// Round-trip check used by readiness probes.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Callback invoked for every message delivered on a subscribed topic.
///
/// Returning `Ok` acknowledges the message; an error leaves it eligible
/// for redelivery.
pub type BrokerHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<(), AppError>> + Send + Sync>;

/// Topic-based message broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AppError>;

    /// Start consuming `topic`; the handler runs for every message.
    async fn subscribe(&self, topic: &str, handler: BrokerHandler) -> Result<(), AppError>;
}

/// Distributed directory of which pods hold live connections for a user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    async fn mark_online(&self, user_id: &str, pod_id: &str) -> Result<(), AppError>;

    async fn mark_offline(&self, user_id: &str, pod_id: &str) -> Result<(), AppError>;

    async fn get_user_pods(&self, user_id: &str) -> Result<Vec<String>, AppError>;

    async fn get_users(&self) -> Result<Vec<String>, AppError>;
}

/// Advisory throttle on inbound client messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `false` once the user exceeded the current window's budget.
    async fn allow(&self, user_id: &str) -> bool;
}

/// Delivers a serialized envelope to a user wherever they are connected.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_to_user(&self, user_id: &str, message: &[u8]) -> Result<(), AppError>;
}
