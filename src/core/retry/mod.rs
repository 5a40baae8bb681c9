//! Retry-with-backoff wrapper for delivery attempts.
//!
//! [`RetryPolicy::execute`] runs an operation up to `max_retries + 1` times.
//! A failure whose classification code is outside `retry_on` is returned at
//! once. A failure without a code counts as transient.

pub mod backoff;

use std::{fmt::Display, future::Future, time::Duration};

use tracing::warn;

pub use backoff::{Backoff, BackoffError};

use crate::config::ExporterConfig;

/// Status codes retried by default.
pub const DEFAULT_RETRY_ON: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Errors that carry an HTTP-style classification code.
pub trait Classify {
    fn status(&self) -> Option<u16>;
}

/// Retry configuration. Stateless across calls to [`execute`](Self::execute).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub retry_on: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(10_000),
            factor: 2.0,
            retry_on: DEFAULT_RETRY_ON.to_vec(),
        }
    }
}

impl From<&ExporterConfig> for RetryPolicy {
    fn from(config: &ExporterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay),
            max_delay: Duration::from_millis(config.retry_max_delay),
            factor: config.retry_factor,
            retry_on: config.retry_on.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retriable<E: Classify>(&self, err: &E) -> bool {
        match err.status() {
            Some(code) => self.retry_on.contains(&code),
            None => true,
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay, self.factor).with_max_retries(self.max_retries)
    }

    /// Runs `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// On exhaustion the last failure is returned. `label` only appears in logs.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Classify + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        let total = u64::from(self.max_retries) + 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retriable(&err) {
                return Err(err);
            }

            let attempt = backoff.attempt() + 1;
            let delay = match backoff.next_sleep() {
                Ok(delay) => delay,
                Err(_) => return Err(err),
            };

            warn!(
                "{} failed (attempt {}/{}). Retrying in {}ms: {}",
                label,
                attempt,
                total,
                delay.as_millis(),
                err
            );
            tokio::time::sleep(delay).await;
        }
    }
}
