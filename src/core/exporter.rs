//! Multi-peer stats exporter.
//!
//! [`StatsExporter`] owns one [`PeerMonitor`] per peer and fans every event
//! they produce out three ways, in this order: the in-memory timeline, the
//! local bus (`timeline` plus the channel named after the event kind), and
//! the batch queue that feeds delivery. Each flushed batch is wrapped in an
//! [`Envelope`] and sent through the retry policy; the outcome is published
//! as `export:success` or `export:error`.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use validator::{Validate, ValidationErrors};

use super::{
    bus::{channels, EventBus, ListenerId, Notification},
    event::{Envelope, Event, EventPayload},
    monitor::{EventSink, MonitorOptions, PeerMonitor},
    queue::{BatchQueue, BatchQueueOptions},
    retry::RetryPolicy,
    stats::PeerConnection,
    transport::Transport,
};
use crate::config::ExporterConfig;

/// Hard failures of exporter construction and [`StatsExporter::add_peer`].
///
/// Everything that happens after a call returns (poll failures, delivery
/// failures) is reported as an event instead.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The transport configuration has no collector url.
    #[error("Transport url is required")]
    MissingUrl,

    #[error("add_peer requires a non-empty peer id")]
    MissingPeerId,

    /// The exporter was destroyed and accepts no new peers.
    #[error("Exporter has been destroyed")]
    Destroyed,

    #[error("Configuration error: {0}")]
    Validation(#[from] ValidationErrors),

    #[cfg(feature = "transport-http")]
    #[error("Transport setup error: {0}")]
    Transport(#[from] peerwatch_transport_http::TransferError),
}

/// Sends flushed batches and reports the outcome on the bus.
struct Delivery {
    session_id: String,
    session_name: String,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    debug: bool,
}

impl Delivery {
    async fn send_batch(&self, items: Vec<Arc<Event>>) {
        if items.is_empty() {
            return;
        }

        let count = items.len();
        let envelope = Envelope::new(&self.session_id, &self.session_name, items);
        if self.debug {
            debug!("Sending batch of {} items...", count);
        }

        let label = format!("export batch ({} items)", count);
        let result = self
            .retry
            .execute(&label, || self.transport.send(&envelope))
            .await;

        match result {
            Ok(()) => {
                if self.debug {
                    debug!("Batch of {} items sent successfully", count);
                }
                self.bus.emit(
                    channels::EXPORT_SUCCESS,
                    &Notification::ExportSuccess {
                        count,
                        session_id: self.session_id.clone(),
                    },
                );
            }
            Err(e) => {
                error!("Failed to send batch of {} items after retries: {}", count, e);
                self.bus.emit(
                    channels::EXPORT_ERROR,
                    &Notification::ExportError {
                        error: e,
                        count,
                        items: Arc::new(envelope.items),
                    },
                );
            }
        }
    }
}

/// A monitored peer and the gate its events pass through.
struct PeerEntry {
    monitor: PeerMonitor,
    /// Cleared under the timeline lock when the peer is removed.
    live: Arc<AtomicBool>,
}

/// State reachable from monitor callbacks.
struct Shared {
    timeline: Mutex<Vec<Arc<Event>>>,
    bus: EventBus,
    queue: BatchQueue<Arc<Event>>,
    /// Set by `destroy`; late events are dropped.
    closed: AtomicBool,
}

impl Shared {
    fn timeline(&self) -> MutexGuard<'_, Vec<Arc<Event>>> {
        self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends to the timeline and publishes locally.
    ///
    /// `admit` runs under the timeline lock, so whatever it checks or
    /// changes is ordered with every other append.
    fn publish_if(&self, event: Event, admit: impl FnOnce() -> bool) -> Option<Arc<Event>> {
        let event = {
            let mut timeline = self.timeline();
            if self.closed.load(Ordering::Acquire) || !admit() {
                trace!("Ignoring {} from a removed peer or destroyed exporter", event);
                return None;
            }
            let event = Arc::new(event);
            timeline.push(event.clone());
            event
        };

        let notification = Notification::Event(event.clone());
        self.bus.emit(channels::TIMELINE, &notification);
        self.bus.emit(event.name(), &notification);
        Some(event)
    }

    fn publish(&self, event: Event) -> Option<Arc<Event>> {
        self.publish_if(event, || true)
    }

    /// Full fan-out for monitor events: timeline, bus, then export queue.
    fn handle(&self, event: Event, live: &AtomicBool) {
        if let Some(event) = self.publish_if(event, || live.load(Ordering::Acquire)) {
            self.queue.push(event);
        }
    }

    /// Closes the peer's gate and publishes `event` as its last timeline entry.
    fn retire(&self, live: &AtomicBool, event: Event) {
        self.publish_if(event, || {
            live.store(false, Ordering::Release);
            true
        });
    }

    fn sink(self: &Arc<Self>, live: Arc<AtomicBool>) -> EventSink {
        let shared = self.clone();
        Arc::new(move |event| shared.handle(event, &live))
    }
}

/// Collects stats from any number of peers and exports them in batches.
///
/// Construction, [`add_peer`](Self::add_peer) and
/// [`destroy`](Self::destroy) spawn tasks and must run inside a tokio runtime.
pub struct StatsExporter {
    session_id: String,
    monitor_options: MonitorOptions,
    peers: Mutex<BTreeMap<String, PeerEntry>>,
    shared: Arc<Shared>,
    destroyed: AtomicBool,
    debug: bool,
}

impl StatsExporter {
    /// Creates an exporter delivering through `transport` and arms its flush timer.
    pub fn new(config: ExporterConfig, transport: Arc<dyn Transport>) -> Result<Self, ExporterError> {
        config.validate()?;

        let session_id = config.resolved_session_id();
        let bus = EventBus::new();

        let delivery = Arc::new(Delivery {
            session_id: session_id.clone(),
            session_name: config.session_name.clone(),
            retry: RetryPolicy::from(&config),
            transport,
            bus: bus.clone(),
            debug: config.debug,
        });

        let queue = BatchQueue::new(
            BatchQueueOptions {
                batch_size: config.batch_size,
                flush_interval: config.flush_interval(),
            },
            move |items| {
                let delivery = delivery.clone();
                async move { delivery.send_batch(items).await }.boxed()
            },
        );
        queue.start();

        if config.debug {
            debug!(session_id = %session_id, "Exporter initialized");
        }

        Ok(Self {
            session_id,
            monitor_options: MonitorOptions {
                get_stats_interval: config.get_stats_interval(),
                raw_stats: config.raw_stats,
                stats_object: config.stats_object,
            },
            peers: Mutex::new(BTreeMap::new()),
            shared: Arc::new(Shared {
                timeline: Mutex::new(Vec::new()),
                bus,
                queue,
                closed: AtomicBool::new(false),
            }),
            destroyed: AtomicBool::new(false),
            debug: config.debug,
        })
    }

    /// Creates an exporter posting to the configured HTTP collector.
    #[cfg(feature = "transport-http")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self, ExporterError> {
        if config.transport.url.trim().is_empty() {
            return Err(ExporterError::MissingUrl);
        }

        let transport = peerwatch_transport_http::HttpExporter::from_config(&config.transport)?;
        Self::new(config.exporter.clone(), Arc::new(transport))
    }

    fn peers(&self) -> MutexGuard<'_, BTreeMap<String, PeerEntry>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts monitoring `connection` under `peer_id`.
    ///
    /// A duplicate `peer_id` is logged and ignored; the existing monitor keeps running.
    pub fn add_peer(
        &self,
        peer_id: &str,
        peer_name: &str,
        connection: Arc<dyn PeerConnection>,
    ) -> Result<(), ExporterError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ExporterError::Destroyed);
        }
        if peer_id.is_empty() {
            return Err(ExporterError::MissingPeerId);
        }

        {
            let mut peers = self.peers();
            if peers.contains_key(peer_id) {
                warn!("Peer \"{}\" already exists. Call remove_peer() first.", peer_id);
                return Ok(());
            }

            let live = Arc::new(AtomicBool::new(true));
            let sink = self.shared.sink(live.clone());
            let monitor = PeerMonitor::new(peer_id, peer_name, connection, self.monitor_options, sink);
            monitor.start();
            peers.insert(peer_id.to_string(), PeerEntry { monitor, live });
        }

        if self.debug {
            debug!("Peer added: {} ({})", peer_id, peer_name);
        }
        self.shared
            .publish(Event::new(peer_id, peer_name, EventPayload::AddPeer));
        Ok(())
    }

    /// Stops monitoring `peer_id`. Unknown ids are logged and ignored.
    pub fn remove_peer(&self, peer_id: &str) {
        let Some(PeerEntry { monitor, live }) = self.peers().remove(peer_id) else {
            warn!("remove_peer(): peer \"{}\" not found", peer_id);
            return;
        };

        monitor.destroy();
        if self.debug {
            debug!("Peer removed: {}", peer_id);
        }
        self.shared.retire(
            &live,
            Event::new(peer_id, monitor.peer_name(), EventPayload::RemovePeer),
        );
    }

    /// Sends everything queued now instead of waiting for the timer.
    pub async fn flush(&self) {
        self.shared.queue.flush().await;
    }

    /// Destroys every monitor, delivers what is queued, and detaches all
    /// listeners. Irreversible; later calls are no-ops.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.debug {
            debug!("Destroying exporter...");
        }

        let peers = std::mem::take(&mut *self.peers());
        for entry in peers.values() {
            entry.monitor.destroy();
        }
        self.shared.closed.store(true, Ordering::Release);

        self.shared.queue.stop();
        self.shared.queue.flush().await;
        self.shared.bus.remove_all_listeners(None);

        if self.debug {
            debug!("Exporter destroyed");
        }
    }

    pub fn on<F>(&self, channel: &str, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.bus.on(channel, callback)
    }

    pub fn once<F>(&self, channel: &str, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.bus.once(channel, callback)
    }

    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        self.shared.bus.off(channel, id)
    }

    /// The local bus, for `remove_all_listeners` and `listener_count`.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Ids of the peers currently monitored.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers().keys().cloned().collect()
    }

    /// Snapshot of every event handled so far, oldest first.
    pub fn timeline(&self) -> Vec<Arc<Event>> {
        self.shared.timeline().clone()
    }

    /// Events queued for export but not yet handed to the transport.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for StatsExporter {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.queue.stop();
    }
}
