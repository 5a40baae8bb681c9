//! Telemetry pipeline: polling, normalization, batching and delivery.

pub mod bus;
pub mod event;
pub mod exporter;
pub mod monitor;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod transport;
