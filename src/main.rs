//! # WebSocket Fan-out Gateway
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Redis store and stream broker
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use ws_fanout::config::Settings;
use ws_fanout::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    ws_fanout::telemetry::init_tracing();

    info!("Starting WebSocket fan-out gateway...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
