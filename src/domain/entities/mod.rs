//! # Domain Entities
//!
//! - **Envelope**: the typed message carried over sockets and the broker
//! - **AckRequest** / **RestoreRequest**: bodies of the reserved client messages
//! - **Connection**: a registered client socket and its outbound buffer

mod connection;
mod envelope;

pub use connection::{Connection, ConnectionState, EnqueueError};
pub use envelope::{kinds, now_millis, AckRequest, Envelope, RestoreRequest, NO_MESSAGE};
