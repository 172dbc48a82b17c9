//! # Tubes Server
//!
//! Channel-based pub/sub over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tubes
//!
//! # Run with an explicit config file
//! tubes ./tubes.toml
//!
//! # Run with environment overrides
//! TUBES_PORT=8080 TUBES_HOST=0.0.0.0 TUBES_LIMITS__MAX_CONNECTIONS=1000 tubes
//! ```
//!
//! Clients connect to `ws://<host>:<port>/connect` and exchange JSON
//! envelopes such as `{"type":"subscribe","channel":"chat"}`.

mod config;
mod demo;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match std::env::args_os().nth(1) {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting tubes server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
