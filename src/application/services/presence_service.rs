//! Presence Service
//!
//! `PresenceRegistry` backed by the shared key-value store: one set per
//! user holding the ids of the pods that currently serve that user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use crate::config::PresenceSettings;
use crate::domain::{KeyValueStore, PresenceRegistry};
use crate::infrastructure::cache::keys;
use crate::shared::error::AppError;

/// Presence directory over a `KeyValueStore`.
pub struct StorePresenceRegistry {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    ttl: Duration,
}

impl StorePresenceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &PresenceSettings) -> Self {
        Self {
            store,
            namespace: settings.namespace.clone(),
            ttl: settings.ttl(),
        }
    }

    fn key(&self, user_id: &str) -> String {
        keys::presence(&self.namespace, user_id)
    }
}

#[async_trait]
impl PresenceRegistry for StorePresenceRegistry {
    /// Add the pod and push the set's expiry out by a full TTL.
    #[instrument(skip(self), level = "debug")]
    async fn mark_online(&self, user_id: &str, pod_id: &str) -> Result<(), AppError> {
        let key = self.key(user_id);
        self.store.set_add(&key, pod_id).await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_offline(&self, user_id: &str, pod_id: &str) -> Result<(), AppError> {
        self.store.set_remove(&self.key(user_id), pod_id).await
    }

    async fn get_user_pods(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        self.store.set_members(&self.key(user_id)).await
    }

    async fn get_users(&self) -> Result<Vec<String>, AppError> {
        let prefix = keys::presence_prefix(&self.namespace);
        let found = self
            .store
            .scan_keys(&keys::presence_pattern(&self.namespace))
            .await?;

        Ok(found
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}
