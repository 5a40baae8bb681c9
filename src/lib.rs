//! peerwatch: statistics collector for live peer-to-peer media connections
//!
//! Polls every monitored connection at a fixed interval, normalizes each
//! stats report into a categorized structure, and exports the resulting
//! events in batches to a remote collector. Delivery retries transient
//! failures with jittered exponential backoff.
//!
//! ## Modules
//!
//! * `config`: Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator` crate.
//!
//! * `core`: The pipeline:
//!   - `stats`: connection capability, report model, normalizer
//!   - `monitor`: per-connection poller and lifecycle forwarding
//!   - `queue`: size/time triggered batch queue
//!   - `retry`: backoff schedule and retry policy
//!   - `transport`: delivery seam and its error classification
//!   - `event`: event model and export envelope
//!   - `bus`: local publish/subscribe channels
//!   - `exporter`: the multi-peer orchestrator
//!
//! * `logger`: Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! ## Features
//!
//! * `transport-http` — Enables delivery over HTTP using the
//!   `peerwatch-transport-http` crate (default: enabled).
//!
//! ## Example
//!
//! ```ignore
//! use peerwatch::{config::Config, core::bus::channels, StatsExporter};
//!
//! let exporter = StatsExporter::from_config(&Config::new()?)?;
//! exporter.on(channels::EXPORT_ERROR, |n| eprintln!("batch dropped: {:?}", n));
//! exporter.add_peer("peer-1", "Alice", connection)?;
//! // ...
//! exporter.destroy().await;
//! ```

pub mod config;
pub mod core;
pub mod logger;

pub use crate::core::{
    bus::{EventBus, ListenerId, Notification},
    event::{Envelope, Event, EventPayload, EventTag},
    exporter::{ExporterError, StatsExporter},
    stats::{PeerConnection, StateKind, StatRecord, StatsError, StatsReport},
    transport::{DeliveryError, Transport},
};
