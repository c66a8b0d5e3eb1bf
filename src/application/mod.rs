//! Application Layer
//!
//! Services that implement the fan-out semantics on top of the domain
//! contracts. The presentation layer drives them from socket events and
//! HTTP requests.

pub mod services;

pub mod dto;
