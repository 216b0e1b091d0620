//! Configuration module for the tinymud server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the MUD server
#[derive(Parser, Debug, Default)]
#[command(name = "tinymud")]
#[command(author = "tinymud authors")]
#[command(version)]
#[command(about = "A tiny single-threaded MUD server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:4000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds between periodic world messages
    #[arg(long)]
    pub tick_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Connections beyond this are dropped at accept time
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Bytes requested per read call
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Upper bound on one readiness wait, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// How long a quitting connection may take to drain its output
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// How long shutdown waits for final messages to drain
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            read_chunk: default_read_chunk(),
            poll_timeout_ms: default_poll_timeout_ms(),
            linger_ms: default_linger_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// World-related configuration
#[derive(Debug, Deserialize)]
pub struct WorldConfig {
    /// Seconds between periodic world messages
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_backlog() -> i32 {
    128
}

fn default_read_chunk() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_linger_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    2_000
}

fn default_tick_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Longest accepted tick interval (one day).
const MAX_TICK_INTERVAL: u64 = 24 * 60 * 60;

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub backlog: i32,
    pub read_chunk: usize,
    pub poll_timeout: Duration,
    pub linger: Duration,
    pub shutdown_grace: Duration,
    pub tick_interval: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            server,
            world,
            logging,
        } = toml_config;

        let listen_str = cli.listen.unwrap_or(server.listen);
        let listen: SocketAddr = listen_str
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("listen address '{listen_str}'")))?;

        let max_connections = cli.max_connections.unwrap_or(server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be > 0".into()));
        }

        let tick_interval = cli.tick_interval.unwrap_or(world.tick_interval);
        if tick_interval == 0 || tick_interval > MAX_TICK_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "tick_interval must be between 1 and {MAX_TICK_INTERVAL} seconds"
            )));
        }

        if server.read_chunk == 0 {
            return Err(ConfigError::Invalid("read_chunk must be > 0".into()));
        }
        if server.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid("poll_timeout_ms must be > 0".into()));
        }

        Ok(Config {
            listen,
            max_connections,
            backlog: server.backlog,
            read_chunk: server.read_chunk,
            poll_timeout: Duration::from_millis(server.poll_timeout_ms),
            linger: Duration::from_millis(server.linger_ms),
            shutdown_grace: Duration::from_millis(server.shutdown_grace_ms),
            tick_interval: Duration::from_secs(tick_interval),
            log_level: cli.log_level.unwrap_or(logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(what) => write!(f, "Invalid configuration: {what}"),
        }
    }
}

impl std::error::Error for ConfigError {}
