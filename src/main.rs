//! tri-echo: a TCP echo server with three selectable I/O models
//!
//! Run modes:
//! - `blocking`: thread-per-connection, line-oriented echo
//! - `reactor`: readiness-based dual-selector reactor (default)
//! - `completion`: completion-style async echo with a bounded read wait
//!
//! All modes serve the same contract on one port: read a chunk,
//! write it back, close the connection.

mod config;
mod server;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        "Starting tri-echo server"
    );

    server::run(config)?;
    Ok(())
}
