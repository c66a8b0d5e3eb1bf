//! Application Services
//!
//! Stateful building blocks of the fan-out core.
//!
//! ## Available Services
//!
//! - **Hub**: local connections of this pod, grouped by user
//! - **StorePresenceRegistry**: which pods serve which user
//! - **StoreRateLimiter**: per-user inbound throttle
//! - **AckStore**: outbox of messages awaiting acknowledgement
//! - **PodSender**: delivery to a user on whichever pod holds them

pub mod ack_store;
pub mod hub;
pub mod presence_service;
pub mod rate_limiter;
pub mod sender;

pub use ack_store::{AckStore, PendingMessage};
pub use hub::Hub;
pub use presence_service::StorePresenceRegistry;
pub use rate_limiter::StoreRateLimiter;
pub use sender::PodSender;
