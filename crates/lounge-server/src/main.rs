//! # Lounge Server
//!
//! Real-time single-room chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (127.0.0.1:5000, WebSocket at /ws)
//! lounge
//!
//! # Run with a specific config file
//! LOUNGE_CONFIG=/path/to/lounge.toml lounge
//!
//! # Run with environment variables
//! LOUNGE_PORT=8080 LOUNGE_HOST=0.0.0.0 lounge
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lounge=debug,lounge_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        room = %config.room.name,
        "Starting Lounge server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
