//! Configuration module for the line-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "line-echo")]
#[command(author = "line-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:7007)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = one per CPU core)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds a connection may stay idle before it is closed
    #[arg(short = 't', long)]
    pub idle_timeout: Option<u64>,

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
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    #[serde(default)]
    pub workers: usize,
    /// Maximum concurrent connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events processed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
        }
    }
}

/// Per-connection session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Initial receive buffer capacity in bytes
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            buffer_capacity: default_buffer_capacity(),
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
    "127.0.0.1:7007".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    crate::session::allocator::DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_buffer_capacity() -> usize {
    crate::session::allocator::DEFAULT_BUFFER_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: usize,
    pub max_connections: usize,
    pub batch_size: usize,
    pub idle_timeout: Duration,
    pub buffer_capacity: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
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

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.unwrap_or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            batch_size: toml_config.server.batch_size,
            idle_timeout: Duration::from_secs(
                cli.idle_timeout
                    .unwrap_or(toml_config.session.idle_timeout),
            ),
            buffer_capacity: toml_config.session.buffer_capacity,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:7007");
        assert_eq!(config.workers, 0);
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.buffer_capacity, 2048);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7007"
            workers = 4
            max_connections = 512

            [session]
            idle_timeout = 15
            buffer_capacity = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7007");
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.max_connections, 512);
        assert_eq!(config.server.batch_size, 1024);
        assert_eq!(config.session.idle_timeout, 15);
        assert_eq!(config.session.buffer_capacity, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 2

            [session]
            idle_timeout = 30

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from(["line-echo", "-l", "127.0.0.1:9001", "-t", "5"]);
        let config = Config::merge(cli, file);

        assert_eq!(config.listen, "127.0.0.1:9001");
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        // Values not given on the command line come from the file
        assert_eq!(config.workers, 2);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_unreadable_file_error() {
        let path = PathBuf::from("/nonexistent/line-echo.toml");
        let err = ConfigError::FileRead(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/nonexistent/line-echo.toml"));
    }
}
