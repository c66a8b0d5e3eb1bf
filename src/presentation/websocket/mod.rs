//! WebSocket Gateway
//!
//! Connection lifecycle and inbound message routing.

pub mod gateway;
pub mod handler;
pub mod router;

pub use gateway::{Gateway, GatewayConfig, GatewayParts};
pub use handler::{ws_handler, ClientAddr};
pub use router::MessageRouter;
