//! tinymud: a tiny multiplayer text server
//!
//! Players connect over plain TCP (telnet works), log in with a name and
//! password, and then share a single room where they can:
//! - look around to see who else is here
//! - say something to everyone
//! - tell something to one player
//! - quit
//!
//! Everything runs on one thread around a readiness-polling event loop.
//! Configuration via CLI arguments or TOML file.

mod auth;
mod commands;
mod config;
mod messages;
mod runtime;

use config::Config;
use tracing::{error, info};
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
        version = messages::VERSION,
        listen = %config.listen,
        max_connections = config.max_connections,
        "Starting tinymud server"
    );

    if let Err(e) = runtime::run(config) {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }

    info!("Server stopped");
    Ok(())
}
