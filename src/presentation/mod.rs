//! Presentation Layer
//!
//! HTTP routes, request guards and the WebSocket gateway.

pub mod http;
pub mod middleware;
pub mod websocket;
