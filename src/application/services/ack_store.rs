//! Ack Store
//!
//! Outbox of messages that asked for an acknowledgement. Each entry lives
//! under `<prefix>:<user_id>:<message_id>` until the client acks it or its
//! TTL runs out, and is replayed to the user's new connections.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::config::AckSettings;
use crate::domain::{now_millis, AckRequest, Connection, Envelope, KeyValueStore, RestoreRequest};
use crate::infrastructure::cache::keys;
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// A stored, still-decodable outbox entry.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub key: String,
    pub envelope: Envelope,
    pub raw: Vec<u8>,
}

/// TTL-bounded acknowledgement outbox.
pub struct AckStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Duration,
}

impl AckStore {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &AckSettings) -> Self {
        Self {
            store,
            prefix: settings.prefix.clone(),
            ttl: settings.ttl(),
        }
    }

    /// Store the serialized envelope until it is acked or expires.
    #[instrument(skip(self, message), level = "debug")]
    pub async fn save(&self, user_id: &str, message_id: &str, message: &[u8]) -> Result<(), AppError> {
        let key = keys::ack(&self.prefix, user_id, message_id);
        self.store.set_with_ttl(&key, message, self.ttl).await
    }

    /// Drop an entry. Acking an unknown or already acked id is a no-op.
    #[instrument(skip(self), level = "debug")]
    pub async fn ack(&self, user_id: &str, message_id: &str) -> Result<(), AppError> {
        let key = keys::ack(&self.prefix, user_id, message_id);
        let existed = self.store.delete(&key).await?;
        debug!(user_id = %user_id, message_id = %message_id, existed, "Message acknowledged");
        Ok(())
    }

    /// Every stored entry of `user_id`.
    ///
    /// Entries that no longer decode are deleted so they cannot be replayed.
    pub async fn pending(&self, user_id: &str) -> Result<Vec<PendingMessage>, AppError> {
        let found = self
            .store
            .scan_keys(&keys::ack_pattern(&self.prefix, user_id))
            .await?;

        let mut pending = Vec::with_capacity(found.len());
        for key in found {
            // Expired between the scan and the read
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match Envelope::from_slice(&raw) {
                Ok(envelope) => pending.push(PendingMessage { key, envelope, raw }),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable outbox entry");
                    self.store.delete(&key).await?;
                }
            }
        }
        Ok(pending)
    }

    /// Replay the user's outbox to a newly registered connection.
    ///
    /// Entries past their `expiresAt` are deleted instead of delivered.
    /// Returns the number of redelivered messages.
    #[instrument(skip(self, conn), fields(user_id = %conn.user_id(), conn_id = %conn.id()))]
    pub async fn sweep(&self, conn: &Connection) -> Result<usize, AppError> {
        let now = now_millis();
        let mut redelivered = 0;

        for entry in self.pending(conn.user_id()).await? {
            if entry.envelope.is_expired(now) {
                self.store.delete(&entry.key).await?;
                debug!(key = %entry.key, "Expired outbox entry removed");
                continue;
            }
            if deliver(conn, entry.raw) {
                redelivered += 1;
            }
        }

        if redelivered > 0 {
            debug!(redelivered, "Outbox replayed");
        }
        Ok(redelivered)
    }

    /// Handle a client `"ack"` message.
    pub async fn handle_ack(&self, conn: &Connection, request: AckRequest) -> Result<(), AppError> {
        if request.id.is_empty() {
            return Err(AppError::BadRequest("ack id must not be empty".into()));
        }
        self.ack(conn.user_id(), &request.id).await
    }

    /// Handle a client `"restore"` message.
    ///
    /// Replays every unexpired entry whose `expiresAt` is not older than
    /// `since` (entries without a deadline always qualify). With nothing
    /// stored the client gets an explicit "no message" reply.
    pub async fn handle_restore(&self, conn: &Connection, request: RestoreRequest) -> Result<(), AppError> {
        let pending = self.pending(conn.user_id()).await?;
        if pending.is_empty() {
            return conn.reply(&Envelope::no_message());
        }

        let now = now_millis();
        let mut redelivered = 0;
        for entry in pending {
            if !restorable(&entry.envelope, request.since, now) {
                continue;
            }
            if deliver(conn, entry.raw) {
                redelivered += 1;
            }
        }

        debug!(user_id = %conn.user_id(), since = request.since, redelivered, "Restore served");
        Ok(())
    }
}

fn restorable(envelope: &Envelope, since: i64, now: i64) -> bool {
    match envelope.deadline() {
        None => true,
        Some(at) => now <= at && (since <= 0 || at >= since),
    }
}

fn deliver(conn: &Connection, raw: Vec<u8>) -> bool {
    match conn.try_send(Bytes::from(raw)) {
        Ok(()) => {
            metrics::record_redelivery();
            true
        }
        Err(e) => {
            warn!(user_id = %conn.user_id(), conn_id = %conn.id(), error = %e, "Outbox redelivery skipped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;
    use tokio_util::sync::CancellationToken;

    fn ack_store() -> AckStore {
        let settings = AckSettings {
            enabled: true,
            prefix: "ws:ack".into(),
            ttl_secs: 600,
        };
        AckStore::new(Arc::new(MemoryStore::new()), &settings)
    }

    fn message(id: &str, expires_at: Option<i64>) -> Vec<u8> {
        let mut env = Envelope::new("chat", json!({"n": id})).with_user("u1").with_ack(id);
        if let Some(at) = expires_at {
            env = env.with_expiry(at);
        }
        env.to_bytes().unwrap()
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Bytes>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(Envelope::from_slice(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_sweep_redelivers_and_drops_expired() {
        let store = ack_store();
        let now = now_millis();
        store.save("u1", "live", &message("live", Some(now + 60_000))).await.unwrap();
        store.save("u1", "forever", &message("forever", None)).await.unwrap();
        store.save("u1", "stale", &message("stale", Some(now - 1))).await.unwrap();

        let (conn, mut rx) = Connection::new("u1", 16, CancellationToken::new());
        assert_eq!(store.sweep(&conn).await.unwrap(), 2);

        let mut ids: Vec<String> = drain(&mut rx).into_iter().filter_map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["forever", "live"]);

        let remaining: Vec<String> = store
            .pending("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(remaining, vec!["ws:ack:u1:forever", "ws:ack:u1:live"]);
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let store = ack_store();
        store.save("u1", "m1", &message("m1", None)).await.unwrap();
        let (conn, _rx) = Connection::new("u1", 4, CancellationToken::new());

        store.handle_ack(&conn, AckRequest { id: "m1".into() }).await.unwrap();
        store.handle_ack(&conn, AckRequest { id: "m1".into() }).await.unwrap();

        assert!(store.pending("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_only_touches_own_user() {
        let store = ack_store();
        store.save("u2", "m1", &message("m1", None)).await.unwrap();
        let (conn, _rx) = Connection::new("u1", 4, CancellationToken::new());

        store.handle_ack(&conn, AckRequest { id: "m1".into() }).await.unwrap();

        assert_eq!(store.pending("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_with_nothing_pending_replies_no_message() {
        let store = ack_store();
        let (conn, mut rx) = Connection::new("u1", 4, CancellationToken::new());

        store.handle_restore(&conn, RestoreRequest::default()).await.unwrap();

        assert_eq!(drain(&mut rx), vec![Envelope::no_message()]);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let store = ack_store();
        let expires = now_millis() + 60_000;
        store.save("u1", "m1", &message("m1", Some(expires))).await.unwrap();
        let (conn, mut rx) = Connection::new("u1", 4, CancellationToken::new());

        store
            .handle_restore(&conn, RestoreRequest { since: expires - 1 })
            .await
            .unwrap();

        let replayed = drain(&mut rx);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].message_id(), Some("m1"));
    }

    #[tokio::test]
    async fn test_restore_skips_expired_entries() {
        let store = ack_store();
        store.save("u1", "old", &message("old", Some(now_millis() - 1_000))).await.unwrap();
        let (conn, mut rx) = Connection::new("u1", 4, CancellationToken::new());

        store.handle_restore(&conn, RestoreRequest::default()).await.unwrap();

        assert!(drain(&mut rx).is_empty());
    }

    #[test_case(None, 0, true ; "no deadline always restorable")]
    #[test_case(Some(2_000), 0, true ; "no lower bound")]
    #[test_case(Some(2_000), 1_500, true ; "deadline after since")]
    #[test_case(Some(2_000), 2_000, true ; "deadline equal to since")]
    #[test_case(Some(2_000), 2_500, false ; "deadline before since")]
    #[test_case(Some(500), 0, false ; "already expired")]
    fn test_restorable(deadline: Option<i64>, since: i64, expected: bool) {
        let mut env = Envelope::new("chat", json!(null));
        env.expires_at = deadline;
        assert_eq!(restorable(&env, since, 1_000), expected);
    }

    #[tokio::test]
    async fn test_empty_ack_id_is_rejected() {
        let store = ack_store();
        let (conn, _rx) = Connection::new("u1", 4, CancellationToken::new());
        let err = store
            .handle_ack(&conn, AckRequest { id: String::new() })
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }
}
