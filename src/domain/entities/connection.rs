//! Connection entity.
//!
//! One live client socket as seen by the rest of the pod: who it belongs
//! to, where its outbound frames go and how far along its lifecycle it is.
//! The socket itself stays with the task that accepted it; everything else
//! only ever holds an `Arc<Connection>`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::envelope::Envelope;
use crate::shared::error::AppError;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why an outbound frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// A registered client socket.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    user_id: String,
    outbound: mpsc::Sender<Bytes>,
    last_seen: Mutex<Instant>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection with an outbound buffer of `capacity` frames.
    ///
    /// Returns the receiving half of the buffer, which the write loop drains.
    /// `cancel` should be a child of the pod-wide shutdown token.
    pub fn new(
        user_id: impl Into<String>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            outbound,
            last_seen: Mutex::new(Instant::now()),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            cancel,
        });
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), EnqueueError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queue an envelope addressed to this connection only.
    pub fn reply(&self, envelope: &Envelope) -> Result<(), AppError> {
        let frame = envelope.to_bytes()?;
        self.try_send(Bytes::from(frame))
            .map_err(|e| AppError::Internal(format!("reply to {} failed: {}", self.id, e)))
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if that is a forward step; returns whether this call
    /// performed the transition.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= next as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Ask both socket loops to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when this connection must shut down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
