//! Multi-pod fan-out behaviour over the shared in-memory store and broker.

mod ack_tests;
mod delivery_tests;
