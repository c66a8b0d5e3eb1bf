//! Hub
//!
//! The connections registered on this pod, grouped by user.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{Connection, EnqueueError};
use crate::infrastructure::metrics::{self, DropReason};

/// Local connection registry.
///
/// Delivery and listing take the read lock; `add` and `remove` take the
/// write lock. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct Hub {
    users: RwLock<HashMap<String, HashMap<Uuid, Arc<Connection>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under its user.
    pub fn add(&self, conn: Arc<Connection>) {
        let count = {
            let mut users = self.users.write();
            users
                .entry(conn.user_id().to_string())
                .or_default()
                .insert(conn.id(), conn);
            users.values().map(HashMap::len).sum()
        };
        metrics::set_websocket_connections(count);
    }

    /// Unregister `conn`.
    ///
    /// Returns `true` when the user has no connection left on this pod,
    /// which is the caller's cue to withdraw the pod from presence.
    pub fn remove(&self, conn: &Connection) -> bool {
        let (last, count) = {
            let mut users = self.users.write();
            let last = match users.get_mut(conn.user_id()) {
                Some(conns) => {
                    conns.remove(&conn.id());
                    conns.is_empty()
                }
                None => true,
            };
            if last {
                users.remove(conn.user_id());
            }
            (last, users.values().map(HashMap::len).sum())
        };
        metrics::set_websocket_connections(count);
        last
    }

    /// Queue `frame` on every local connection of `user_id`.
    ///
    /// A full buffer drops the frame for that connection only. A user with
    /// no local connection is not an error. Returns how many connections
    /// accepted the frame.
    pub fn send_local(&self, user_id: &str, frame: Bytes) -> usize {
        let users = self.users.read();
        let Some(conns) = users.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in conns.values() {
            match conn.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_local_delivery();
                }
                Err(EnqueueError::Full) => {
                    metrics::record_drop(DropReason::Backpressure);
                    tracing::warn!(
                        user_id = %user_id,
                        conn_id = %conn.id(),
                        "Outbound buffer full, message dropped"
                    );
                }
                Err(EnqueueError::Closed) => {
                    tracing::debug!(
                        user_id = %user_id,
                        conn_id = %conn.id(),
                        "Connection closing, message skipped"
                    );
                }
            }
        }
        delivered
    }

    /// Users with at least one local connection.
    pub fn users(&self) -> Vec<String> {
        self.users.read().keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.users.read().values().map(HashMap::len).sum()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.users.read().get(user_id).map_or(0, HashMap::len)
    }

    /// Ask every local connection to shut down.
    pub fn close_all(&self) {
        for conns in self.users.read().values() {
            for conn in conns.values() {
                conn.close();
            }
        }
    }
}
