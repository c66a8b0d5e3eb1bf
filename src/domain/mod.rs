//! # Domain Layer
//!
//! Wire types and collaborator contracts of the fan-out core. Nothing in
//! here depends on Redis, axum or any other infrastructure.
//!
//! ## Structure
//!
//! - **entities**: The `Envelope` wire message, its request bodies and the
//!   `Connection` handle shared between the hub and the socket tasks
//! - **contracts**: Traits for the key-value store, broker, presence
//!   registry, rate limiter and cross-pod sender

pub mod contracts;
pub mod entities;

// Re-export commonly used types
pub use contracts::*;
pub use entities::*;
