//! # WebSocket Fan-out Gateway
//!
//! Delivers messages to users connected to any pod of a horizontally
//! scaled WebSocket tier:
//! - Per-pod connection hub with bounded, drop-on-full outbound buffers
//! - Cluster-wide presence directory (user -> pods) in Redis
//! - Cross-pod delivery over per-pod Redis Streams topics
//! - Per-user inbound rate limiting
//! - Outbox of messages awaiting acknowledgement, with restore on reconnect
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Wire envelope, connection handle and collaborator traits
//! - **Application Layer**: Hub, presence, rate limiter, outbox and sender services
//! - **Infrastructure Layer**: Redis and in-memory stores and brokers, metrics
//! - **Presentation Layer**: HTTP routes, upgrade handler and the gateway
//!
//! ## Module Structure
//!
//! ```text
//! ws_fanout/
//! +-- config/         Configuration management
//! +-- domain/         Envelope, Connection and contracts
//! +-- application/    Fan-out services and DTOs
//! +-- infrastructure/ Store, broker and metrics implementations
//! +-- presentation/   HTTP routes, middleware and WebSocket gateway
//! +-- shared/         Errors and validation helpers
//! ```

// Configuration module
pub mod config;

// Domain layer - Core types and contracts
pub mod domain;

// Application layer - Fan-out services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
