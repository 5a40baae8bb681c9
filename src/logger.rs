//! Centralized logging configuration and initialization manager.
//!
//! The `LoggerManager` validates logging configuration and initializes
//! the global `tracing` subscriber with a console layer and/or a systemd
//! journald layer. `RUST_LOG` takes precedence over the configured level.

use std::io;

use thiserror::Error;
use tracing::instrument;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer, Registry};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, LogFormat, LoggerConfig},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors that can occur during logger configuration or initialization.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Validation errors from the logger configuration struct.
    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// IO error, typically during journald socket operations.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// A global subscriber is already installed.
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    /// No output layers were successfully configured.
    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    /// Journald failed to initialize while console output is enabled.
    #[error(
        "Failed to initialize journald logger, and console logger is enabled. Please check your configuration."
    )]
    JournaldFailedWithConsoleEnabled,
}

/// Manages logging configuration and global subscriber initialization.
pub struct LoggerManager {
    config: LoggerConfig,
    level: String,
}

/// Applies the shared console options to a formatter of any flavour.
macro_rules! console_layer {
    ($layer:expr, $config:expr, $filter:expr) => {
        $layer
            .with_target($config.show_target)
            .with_thread_ids($config.show_thread_ids)
            .with_span_events(if $config.show_spans {
                FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .with_ansi($config.ansi_colors)
            .with_writer(io::stdout)
            .with_filter($filter)
            .boxed()
    };
}

impl LoggerManager {
    /// Creates a new `LoggerManager` and validates the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns `LoggerError::ValidationError` if configuration validation fails.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;

        let level = config.effective_level(false);
        Ok(LoggerManager { config, level })
    }

    /// Raises the level to at least `debug` when the exporter runs in debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.level = self.config.effective_level(debug);
        self
    }

    /// Level used when `RUST_LOG` is not set.
    pub fn level(&self) -> &str {
        &self.level
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Installs the global `tracing` subscriber. Call once at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if no layer can be created, if journald fails while
    /// console output is enabled, or if a global subscriber already exists.
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.init_console_logger(console_config));
        }

        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.init_journald_logger(&journald_config.identifier) {
                Ok(journald_layer) => {
                    layers.push(journald_layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if self.config.console.as_ref().is_some_and(|c| c.enabled) {
                        return Err(LoggerError::JournaldFailedWithConsoleEnabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn init_console_logger(&self, config: &ConsoleConfig) -> BoxedLayer {
        let filter = self.filter();
        match config.format {
            LogFormat::Json => console_layer!(fmt::layer().json(), config, filter),
            LogFormat::Pretty => console_layer!(fmt::layer().pretty(), config, filter),
            LogFormat::Compact => console_layer!(fmt::layer().compact(), config, filter),
        }
    }

    fn init_journald_logger(&self, identifier: &str) -> Result<BoxedLayer, LoggerError> {
        let journald_layer = tracing_journald::layer()?.with_syslog_identifier(identifier.to_string());
        Ok(journald_layer.with_filter(self.filter()).boxed())
    }
}
