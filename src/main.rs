//! overwire: a readiness-driven TCP message server.
//!
//! Accumulates percent-encoded fragments per connection until the decoded
//! text contains the terminator "over", answers with a single encoded
//! response, and closes the connection.

use overwire::config::Config;
use overwire::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // Initialize logging (env filter overrides the configured level)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        max_message_bytes = config.max_message_bytes,
        idle_timeout_ms = config.idle_timeout_ms,
        "Starting overwire server"
    );

    runtime::run(config)?;
    Ok(())
}
