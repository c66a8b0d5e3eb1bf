//! Rate Limiter
//!
//! Fixed-window counter per user kept in the shared key-value store, so the
//! budget holds across every pod a user is connected to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RateLimitSettings;
use crate::domain::{KeyValueStore, RateLimiter};
use crate::infrastructure::cache::keys;

/// `RateLimiter` over a `KeyValueStore` counter.
///
/// Each increment arms the window expiry atomically if the counter has none;
/// the window ends when the key expires and the next increment starts a new
/// one. Storage errors let the message through.
pub struct StoreRateLimiter {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    limit: i64,
    window: Duration,
    enabled: bool,
}

impl StoreRateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &RateLimitSettings) -> Self {
        Self {
            store,
            prefix: settings.prefix.clone(),
            limit: i64::from(settings.limit),
            window: settings.window(),
            enabled: settings.enabled,
        }
    }
}

#[async_trait]
impl RateLimiter for StoreRateLimiter {
    async fn allow(&self, user_id: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let key = keys::rate_limit(&self.prefix, user_id);
        match self.store.incr_with_ttl(&key, self.window).await {
            Ok(count) => count <= self.limit,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Rate limit check failed, allowing");
                true
            }
        }
    }
}
