//! # peerwatch-transport-http: JSON-over-HTTP batch delivery
//!
//! Delivers serialized batches to a remote collector with a single POST per
//! call and a hard request timeout. Failures carry an HTTP-style status code
//! so a retry policy in front of this crate can tell transient failures
//! (timeouts, 5xx, 429) from permanent ones (other 4xx).
//!
//! ```ignore
//! use peerwatch_transport_http::{Config, HttpExporter};
//!
//! let exporter = HttpExporter::from_config(
//!     &Config::new("https://collector.example.com/ingest")
//!         .with_header("Authorization", "Bearer token"),
//! )?;
//!
//! match exporter.send(&envelope).await {
//!     Ok(()) => {}
//!     Err(e) if e.status() == Some(408) => { /* timed out */ }
//!     Err(e) => eprintln!("delivery failed: {}", e),
//! }
//! ```

pub mod config;
pub mod error;
pub mod exporter;

pub use config::Config;
pub use error::TransferError;
pub use exporter::HttpExporter;

/// Result type for HTTP delivery operations.
pub type Result<T> = std::result::Result<T, TransferError>;
