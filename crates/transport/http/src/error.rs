//! Error type for HTTP delivery.
//!
//! Every failure that reaches the caller carries enough information to decide
//! whether the request is worth repeating. [`TransferError::status`] exposes
//! that decision input as an HTTP-style status code:
//!
//! - a response outside the 2xx range reports its own status,
//! - a request that exceeded the configured timeout reports `408`,
//! - setup, serialization and connection-level failures report no status.

use thiserror::Error;

/// Unified error type for HTTP delivery operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP client or endpoint URL could not be set up.
    ///
    /// Raised at construction time, never during `send`.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration validation failed (empty url, zero timeout).
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// A configured header name or value is not valid HTTP.
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The payload could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No response arrived within the configured timeout.
    #[error("HTTP request timed out after {0}ms")]
    Timeout(u64),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransferError {
    /// Classification code used by retry policies.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Status { status, .. } => Some(*status),
            TransferError::Timeout(_) => Some(408),
            _ => None,
        }
    }
}
