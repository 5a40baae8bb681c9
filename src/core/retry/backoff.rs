//! Exponential backoff schedule with jitter.
//!
//! ```text
//! delay[n] = min(base * factor^n, max) * jitter,   jitter in [0.8, 1.2)
//! ```
//!
//! With the defaults (base=500ms, factor=2, max=10s) the un-jittered delays
//! after the first three failures are 500ms, 1s and 2s.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Lower bound of the jitter multiplier (inclusive).
pub const JITTER_MIN: f64 = 0.8;
/// Upper bound of the jitter multiplier (exclusive).
pub const JITTER_MAX: f64 = 1.2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    /// Every permitted retry has already been handed out.
    #[error("Maximum number of retries exceeded: {0}")]
    MaxRetriesExceeded(u32),
}

/// Stateful retry schedule for one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,

    /// Retries handed out so far.
    attempt: u32,

    /// Retries permitted after the first attempt.
    max_retries: u32,
}

impl Backoff {
    /// Creates a schedule with an unlimited number of retries.
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        Self {
            base_delay: base,
            max_delay: max,
            factor,
            attempt: 0,
            max_retries: u32::MAX,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Starts the schedule over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Returns the jittered delay before the next retry and advances the schedule.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if self.attempt >= self.max_retries {
            return Err(BackoffError::MaxRetriesExceeded(self.max_retries));
        }

        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Ok(jitter(delay))
    }

    /// Retries handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Scales `delay` by a random factor in `[JITTER_MIN, JITTER_MAX)`.
pub fn jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(JITTER_MIN..JITTER_MAX);
    delay.mul_f64(factor)
}
