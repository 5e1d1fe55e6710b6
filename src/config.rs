//! Configuration module for pong-responder.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the responder
#[derive(Parser, Debug, Default)]
#[command(name = "pong-responder")]
#[command(author = "pong-responder authors")]
#[command(version = "0.1.0")]
#[command(about = "Answers every received chunk with a numbered PONG", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Largest chunk read from a connection in one call
    #[arg(long)]
    pub max_chunk_size: Option<usize>,

    /// Depth of the pending-connection queue
    #[arg(long)]
    pub backlog: Option<u32>,

    /// I/O backend driving the accept loop
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// I/O backend. Every backend serves exactly one connection at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Blocking std sockets.
    #[default]
    Blocking,
    /// Single-threaded mio readiness loop.
    Mio,
    /// Single-threaded Tokio runtime.
    Tokio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_address")]
    pub address: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending-connection queue depth
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// I/O backend
    #[serde(default)]
    pub runtime: RuntimeType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
            runtime: RuntimeType::default(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Read buffer size
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
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

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5005
}

fn default_max_chunk_size() -> usize {
    256 // small on purpose: fast turnaround per chunk
}

fn default_backlog() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    pub address: String,
    pub port: u16,
    pub max_chunk_size: usize,
    pub backlog: u32,
    pub runtime: RuntimeType,
    pub log_level: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl ResponderConfig {
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

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        ResponderConfig {
            address: cli.address.unwrap_or(toml_config.server.address),
            port: cli.port.unwrap_or(toml_config.server.port),
            max_chunk_size: cli
                .max_chunk_size
                .unwrap_or(toml_config.connection.max_chunk_size),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Reject values the responder cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // a zero-length read buffer would make every read look like EOF
        if self.max_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "max_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid(
                "backlog must be at least 1".to_string(),
            ));
        }
        if i32::try_from(self.backlog).is_err() {
            return Err(ConfigError::Invalid(format!(
                "backlog {} is out of range",
                self.backlog
            )));
        }
        Ok(())
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}
