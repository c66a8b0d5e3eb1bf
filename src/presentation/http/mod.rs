//! HTTP API
//!
//! Health, metrics, presence and server push endpoints.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
