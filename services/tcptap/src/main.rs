//! tcptap
//!
//! Transparent TCP intercepting proxy.
//!
//! This service:
//! - Accepts TCP connections on the configured bind address
//! - Opens a matching outbound connection to the fixed remote endpoint
//! - Splices both directions through external filter programs
//! - Renders a deduplicated, control-character-safe transcript on stdout
//!
//! Diagnostics go to stderr via `tracing`; the transcript owns stdout.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tcptap::{Config, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Prefer RUST_LOG, fall back to --log-level.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    info!(
        listen = %config.listen_addr(),
        remote = %config.remote(),
        filter_in = %config.filter_in,
        filter_out = %config.filter_out,
        "starting tcptap"
    );

    let listener = Listener::bind(config).await?;
    listener.run().await?;
    Ok(())
}
