//! Configuration loading, validation and defaults.
//!
//! The top-level [`Config`] aggregates logging, exporter and transport
//! settings. It is read once from a TOML file, validated, and treated as
//! immutable afterwards.
//!
//! ```toml
//! [logger]
//! level = "info"
//!
//! [exporter]
//! session_name = "standup-call"
//! get_stats_interval = 2000
//! batch_size = 20
//!
//! [transport]
//! url = "https://collector.example.com/ingest"
//! timeout = 10000
//!
//! [transport.headers]
//! Authorization = "Bearer token"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};
use validator::Validate;

pub mod exporter;
pub mod logger;

pub use exporter::ExporterConfig;
pub use logger::LoggerConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PEERWATCH_CONFIG";

/// Fallback configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/peerwatch/config.toml";

/// Current UTC time as printed by the `print_*` macros.
#[doc(hidden)]
pub fn print_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::print_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::print_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::print_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No configuration file could be located.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while accessing configuration files.
    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Logging subsystem configuration.
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Polling, batching and retry configuration.
    #[validate(nested)]
    pub exporter: ExporterConfig,

    /// Collector endpoint configuration.
    ///
    /// An empty `url` passes validation here; the exporter rejects it at
    /// construction with a dedicated error.
    pub transport: TransportConfig,
}

#[cfg(feature = "transport-http")]
pub type TransportConfig = peerwatch_transport_http::Config;

/// Endpoint settings when no built-in transport is compiled in.
#[cfg(not(feature = "transport-http"))]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
    pub headers: std::collections::BTreeMap<String, String>,
    pub timeout: u64,
}

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the configuration file cannot be found,
    /// read, parsed, or validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Priority:
    /// 1. `PEERWATCH_CONFIG` environment variable
    /// 2. `/etc/peerwatch/config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(
            "No configuration file found.".to_string(),
        ))
    }

    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::from_toml(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(source: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
