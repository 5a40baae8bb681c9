//! Configuration for the HTTP delivery endpoint.
//!
//! The structure is embedded in the application configuration under the
//! `[transport]` table, the same way any other transport crate would be.
//!
//! # Examples
//!
//! ```toml
//! [transport]
//! url = "https://collector.example.com/ingest"
//! timeout = 10000
//!
//! [transport.headers]
//! Authorization = "Bearer token"
//! ```

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Collector URL batches are POSTed to. Required.
    #[validate(length(min = 1, message = "Endpoint url must not be empty"))]
    pub url: String,

    /// Extra headers sent with every request (e.g. `Authorization`).
    ///
    /// A configured `Content-Type` overrides the default `application/json`.
    pub headers: BTreeMap<String, String>,

    /// Request timeout in milliseconds. A request that does not produce a
    /// response in time fails with status classification 408.
    #[validate(range(min = 1, message = "Timeout must be at least 1 ms"))]
    pub timeout: u64,
}

impl Config {
    /// Creates a configuration for `url` with default timeout and no extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Adds an extra request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Overrides the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_requires_url() {
        let config = Config::default();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_MS);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_helpers() {
        let config = Config::new("http://localhost:8080/ingest")
            .with_header("Authorization", "Bearer abc")
            .with_timeout(Duration::from_secs(2));

        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert_eq!(
            config.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            timeout: 0,
            ..Config::new("http://localhost/ingest")
        };
        assert!(config.validate().is_err());
    }
}
