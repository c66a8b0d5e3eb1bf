//! Data Transfer Objects
//!
//! DTOs for API request/response serialization.

pub mod request;
pub mod response;

pub use request::SendMessageRequest;
pub use response::{PresenceUsersResponse, PushResponse, UserPresenceResponse};
