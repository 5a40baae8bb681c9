//! Exporter configuration: session identity, polling, batching and retry.
//!
//! Every duration is expressed in milliseconds, as in the TOML file.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::retry::DEFAULT_RETRY_ON;

const SESSION_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Settings for one exporter instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExporterConfig {
    /// Session identifier sent with every batch. Generated when absent or empty.
    pub session_id: Option<String>,

    /// Human-readable session label.
    pub session_name: String,

    /// Delay between two stats polls of the same peer.
    #[validate(range(min = 1, message = "Stats interval must be at least 1ms"))]
    pub get_stats_interval: u64,

    /// Attach the unmodified report to every `stats` event.
    pub raw_stats: bool,

    /// Attach the flattened `id -> record` view to every `stats` event.
    pub stats_object: bool,

    #[validate(range(min = 1, message = "Batch size must be at least 1"))]
    pub batch_size: usize,

    #[validate(range(min = 1, message = "Flush interval must be at least 1ms"))]
    pub flush_interval: u64,

    /// Retries after the first delivery attempt.
    pub max_retries: u32,

    pub retry_base_delay: u64,

    pub retry_max_delay: u64,

    /// Growth factor of the backoff delay.
    #[validate(range(min = 1.0, message = "Retry factor must be at least 1.0"))]
    pub retry_factor: f64,

    /// Classification codes that warrant another attempt.
    #[validate(custom(function = "validate_retry_on"))]
    pub retry_on: Vec<u16>,

    /// Log lifecycle and batch activity at debug level.
    pub debug: bool,
}

fn validate_retry_on(codes: &[u16]) -> Result<(), ValidationError> {
    match codes.iter().find(|code| !(100..=599).contains(*code)) {
        Some(code) => {
            let mut err = ValidationError::new("invalid_status_code");
            err.message = Some(format!("Not an HTTP status code: {}", code).into());
            Err(err)
        }
        None => Ok(()),
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            session_name: "unknown".to_string(),
            get_stats_interval: 2000,
            raw_stats: false,
            stats_object: false,
            batch_size: 20,
            flush_interval: 5000,
            max_retries: 3,
            retry_base_delay: 500,
            retry_max_delay: 10_000,
            retry_factor: 2.0,
            retry_on: DEFAULT_RETRY_ON.to_vec(),
            debug: false,
        }
    }
}

impl ExporterConfig {
    /// The configured session id, or a freshly generated one.
    pub fn resolved_session_id(&self) -> String {
        match self.session_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_session_id(),
        }
    }

    pub fn get_stats_interval(&self) -> Duration {
        Duration::from_millis(self.get_stats_interval)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval)
    }
}

/// Generates `session-<unix millis>-<6 base-36 chars>`.
pub fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let mut rng = rand::rng();
    let suffix: String = (0..SESSION_SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.random_range(0..BASE36.len())]))
        .collect();

    format!("session-{}-{}", millis, suffix)
}
