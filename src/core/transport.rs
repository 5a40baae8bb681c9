//! Delivery seam between the exporter and the network.

use async_trait::async_trait;
use thiserror::Error;

use super::{event::Envelope, retry::Classify};

/// Failure to deliver one envelope.
///
/// Cloneable so the same failure can be handed to every `export:error`
/// listener.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    /// The collector answered with a non-success status.
    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    /// No answer within the configured timeout, in milliseconds.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The collector could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The envelope could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl DeliveryError {
    /// Classification code: the endpoint's status, or 408 on timeout.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            DeliveryError::Timeout(_) => Some(408),
            _ => None,
        }
    }
}

impl Classify for DeliveryError {
    fn status(&self) -> Option<u16> {
        DeliveryError::status(self)
    }
}

/// Sends one envelope per call. Implementations must not retry internally.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}

#[cfg(feature = "transport-http")]
mod http {
    use async_trait::async_trait;
    use peerwatch_transport_http::{HttpExporter, TransferError};

    use super::{DeliveryError, Transport};
    use crate::core::event::Envelope;

    impl From<TransferError> for DeliveryError {
        fn from(err: TransferError) -> Self {
            match err {
                TransferError::Status { status, reason } => DeliveryError::Status { status, reason },
                TransferError::Timeout(ms) => DeliveryError::Timeout(ms),
                TransferError::Serialization(e) => DeliveryError::Serialization(e.to_string()),
                other => DeliveryError::Connection(other.to_string()),
            }
        }
    }

    #[async_trait]
    impl Transport for HttpExporter {
        async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
            HttpExporter::send(self, envelope).await.map_err(DeliveryError::from)
        }
    }
}
