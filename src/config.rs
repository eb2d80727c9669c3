//! Configuration for the echo servers and client harness.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "mux-echo")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo service built two ways", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind or connect to (e.g., 127.0.0.1:50007)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// What to run: the multiplexing server, the blocking server, or the client harness
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Mux)]
    pub mode: Mode,

    /// Listen backlog for the server socket
    #[arg(short = 'b', long)]
    pub backlog: Option<u32>,

    /// Maximum number of concurrently admitted connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Per-read chunk size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Number of parallel clients spawned by the harness
    #[arg(short = 'n', long)]
    pub clients: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Which component a single invocation runs.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single-threaded readiness-multiplexed server
    Mux,
    /// Thread-per-connection blocking server
    Blocking,
    /// Concurrent client harness
    Client,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Maximum number of concurrently admitted connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-read chunk size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Client-harness configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Number of parallel clients
    #[serde(default = "default_clients")]
    pub clients: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clients: default_clients(),
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
    "127.0.0.1:50007".to_string()
}

fn default_backlog() -> u32 {
    10
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    1024
}

fn default_clients() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub mode: Mode,
    pub backlog: u32,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub clients: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mode: Mode::Mux,
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            clients: default_clients(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::resolve(cli)
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            mode: cli.mode,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            clients: cli.clients.unwrap_or(toml_config.client.clients),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "127.0.0.1:50007");
        assert_eq!(config.mode, Mode::Mux);
        assert_eq!(config.backlog, 10);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.clients, 5);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:50007"
            backlog = 64
            max_connections = 128

            [client]
            clients = 10

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:50007");
        assert_eq!(config.server.backlog, 64);
        assert_eq!(config.server.max_connections, 128);
        assert_eq!(config.server.buffer_size, 1024);
        assert_eq!(config.client.clients, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml_defaults() {
        let cli = CliArgs {
            config: None,
            listen: Some("127.0.0.1:0".to_string()),
            mode: Mode::Client,
            backlog: None,
            max_connections: None,
            buffer_size: None,
            clients: Some(2),
            log_level: "info".to_string(),
        };

        let config = Config::resolve(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:0");
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.clients, 2);
        // Untouched fields fall back to defaults
        assert_eq!(config.backlog, 10);
    }
}
