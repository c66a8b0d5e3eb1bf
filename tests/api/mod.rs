//! HTTP API tests

mod health_tests;
mod message_tests;
mod presence_tests;
mod websocket_tests;
