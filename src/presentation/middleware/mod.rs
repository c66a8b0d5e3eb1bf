//! Middleware
//!
//! Tower middleware and request guards.

pub mod auth;
pub mod cors;
pub mod logging;

pub use auth::{auth_middleware, issue_token, verify_token, AuthUser, Claims};
pub use cors::origin_allowed;
