use thiserror::Error;

/// Failure reported by a peer connection when a statistics snapshot
/// cannot be produced.
///
/// A poll failure never stops the polling loop: the monitor turns it into an
/// `error` event and tries again on the next interval.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    /// The connection has been closed and no longer answers stats requests.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The stats request was issued but the connection rejected it.
    #[error("Stats request failed: {reason}")]
    RequestFailed {
        reason: String,
        /// Lower-level detail, rendered as the trace of the `error` event.
        detail: Option<String>,
    },

    /// The report was produced but could not be decoded.
    #[error("Invalid stats report: {0}")]
    InvalidReport(String),

    /// A catch-all for failures that don't fit other variants.
    #[error("Other error: {0}")]
    Other(String),
}

impl StatsError {
    /// Secondary diagnostic text, if the failure carries any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            StatsError::RequestFailed { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}
