//! Redis Store
//!
//! `KeyValueStore` on top of a Redis `ConnectionManager`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::domain::KeyValueStore;
use crate::shared::error::AppError;

/// Number of keys requested per SCAN round trip.
const SCAN_BATCH: usize = 200;

/// Redis-backed key-value store.
///
/// Uses a Redis ConnectionManager for connection multiplexing and
/// automatic reconnection handling. Cloning is cheap.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager with automatic reconnection
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Redis expiries have second granularity; partial seconds round up.
    fn ttl_secs(ttl: Duration) -> u64 {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip(self), level = "debug")]
    async fn set_add(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();

        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();

        // Redis deletes a set once its last member is removed
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_members(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();

        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    #[instrument(skip(self), level = "debug")]
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();

        // Redis EXPIRE returns 1 if timeout was set, 0 if key does not exist
        let result: i32 = conn
            .expire(key, Self::ttl_secs(ttl) as i64)
            .await?;
        Ok(result == 1)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let mut conn = self.conn.clone();

        let value: Option<Vec<u8>> = conn.get(key).await?;
        debug!(key = %key, hit = value.is_some(), "Store get");
        Ok(value)
    }

    #[instrument(skip(self, value), level = "debug")]
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();

        let _: () = conn
            .set_ex(key, value.to_vec(), Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    /// `EXPIRE ... NX` (Redis 7+) rides in the same MULTI as the INCR, so a
    /// counter can never be left without an expiry.
    #[instrument(skip(self), level = "debug")]
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, AppError> {
        let mut conn = self.conn.clone();

        let (value,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(Self::ttl_secs(ttl))
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();

        let deleted: u64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    /// Iterates with SCAN rather than KEYS so large keyspaces never block Redis.
    #[instrument(skip(self), level = "debug")]
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();

        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        debug!(pattern = %pattern, count = found.len(), "Store scan");
        Ok(found)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
