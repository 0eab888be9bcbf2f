//! # Siren Server
//!
//! Realtime proximity alert relay between ambulances and nearby cars.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! siren
//!
//! # Run with environment variables
//! SIREN_PORT=8080 SIREN_HOST=0.0.0.0 GOOGLE_MAPS_API_KEY=... siren
//! ```
//!
//! A `siren.toml` in the working directory, `/etc/siren/` or
//! `~/.config/siren/` takes precedence over the environment.

mod config;
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
                .unwrap_or_else(|_| "siren=debug,siren_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Siren server on {}:{}", config.host, config.port);
    if config.routing.enabled && config.routing.api_key.is_none() {
        tracing::warn!("No routing API key configured, alerts will carry straight-line routes");
    }

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
