//! line-echo: a line-oriented TCP echo server
//!
//! Every complete line a client sends (terminated by `\n`) is written back
//! to it unchanged. Connections that stay idle longer than the configured
//! timeout are closed.
//!
//! Features:
//! - One session per connection, driven by readiness notifications
//! - Per-connection idle timeout
//! - Worker threads sharing the port via SO_REUSEPORT
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;
mod session;

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
        workers = config.workers,
        max_connections = config.max_connections,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Starting line-echo server"
    );

    runtime::run(config)?;
    Ok(())
}
