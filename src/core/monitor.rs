//! Per-connection stats poller.
//!
//! A [`PeerMonitor`] polls one [`PeerConnection`] at a fixed interval and
//! forwards its four lifecycle properties as `connection` events. Lifecycle:
//!
//! ```text
//! Idle --start--> Active --stop--> Stopped --start--> Active
//!   \               |                 |
//!    `---------- destroy ------------' --> Destroyed (terminal)
//! ```
//!
//! Every poll task is bound to the generation it was started with; a poll
//! that resolves after `stop` or `destroy` finds its generation stale and
//! emits nothing.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    event::{ErrorInfo, Event, EventPayload},
    stats::{normalize, report_to_object, PeerConnection, StateKind, StatsReport},
};

/// Receives every event a monitor produces.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub get_stats_interval: Duration,
    /// Attach the unmodified report as `rawStats`.
    pub raw_stats: bool,
    /// Attach the flattened report as `statsObject`.
    pub stats_object: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            get_stats_interval: Duration::from_millis(2000),
            raw_stats: false,
            stats_object: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Active,
    Stopped,
    Destroyed,
}

struct Control {
    state: MonitorState,
    poll_task: Option<JoinHandle<()>>,
    generation: u64,
    connection: Option<Arc<dyn PeerConnection>>,
}

struct MonitorInner {
    peer_id: String,
    peer_name: String,
    options: MonitorOptions,
    sink: EventSink,
    control: Mutex<Control>,
    listeners: CancellationToken,
}

impl MonitorInner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let control = self.lock();
        control.state == MonitorState::Active && control.generation == generation
    }

    fn emit(&self, payload: EventPayload) {
        (self.sink)(Event::new(&self.peer_id, &self.peer_name, payload));
    }

    fn stats_payload(&self, report: StatsReport) -> EventPayload {
        EventPayload::Stats {
            data: normalize(&report),
            stats_object: self.options.stats_object.then(|| report_to_object(&report)),
            raw_stats: self.options.raw_stats.then_some(report),
        }
    }

    /// Runs one poll cycle. Returns whether the monitor is still active.
    async fn poll_once(&self, generation: u64) -> bool {
        let connection = {
            let control = self.lock();
            if control.state != MonitorState::Active || control.generation != generation {
                return false;
            }
            match &control.connection {
                Some(connection) => connection.clone(),
                None => return false,
            }
        };

        let result = connection.get_stats().await;
        drop(connection);

        if !self.is_current(generation) {
            trace!("Discarding stats for peer {}: monitor no longer active", self.peer_id);
            return false;
        }

        let payload = match result {
            Ok(report) => self.stats_payload(report),
            Err(e) => {
                debug!("Stats poll failed for peer {}: {}", self.peer_id, e);
                EventPayload::Error {
                    error: ErrorInfo::from(&e),
                }
            }
        };
        self.emit(payload);

        self.is_current(generation)
    }
}

async fn poll_loop(inner: Arc<MonitorInner>, generation: u64) {
    loop {
        sleep(inner.options.get_stats_interval).await;
        if !inner.poll_once(generation).await {
            break;
        }
    }
}

async fn forward_state_changes(
    inner: Arc<MonitorInner>,
    kind: StateKind,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            state = rx.recv() => {
                let Some(state) = state else {
                    trace!("{} source closed for peer {}", kind, inner.peer_id);
                    break;
                };
                if inner.lock().state == MonitorState::Destroyed {
                    break;
                }
                inner.emit(EventPayload::state_change(kind, state));
            }
        }
    }
}

/// Poller for one peer connection.
pub struct PeerMonitor {
    inner: Arc<MonitorInner>,
}

impl PeerMonitor {
    /// Binds the lifecycle listeners. Polling does not begin until [`start`](Self::start).
    pub fn new(
        peer_id: impl Into<String>,
        peer_name: impl Into<String>,
        connection: Arc<dyn PeerConnection>,
        options: MonitorOptions,
        sink: EventSink,
    ) -> Self {
        let inner = Arc::new(MonitorInner {
            peer_id: peer_id.into(),
            peer_name: peer_name.into(),
            options,
            sink,
            control: Mutex::new(Control {
                state: MonitorState::Idle,
                poll_task: None,
                generation: 0,
                connection: Some(connection.clone()),
            }),
            listeners: CancellationToken::new(),
        });

        for kind in StateKind::ALL {
            tokio::spawn(forward_state_changes(
                inner.clone(),
                kind,
                connection.subscribe_state(kind),
                inner.listeners.child_token(),
            ));
        }

        Self { inner }
    }

    /// Schedules the first poll one interval from now. No-op while active.
    pub fn start(&self) {
        let mut control = self.inner.lock();
        if matches!(control.state, MonitorState::Active | MonitorState::Destroyed) {
            return;
        }

        control.state = MonitorState::Active;
        control.generation += 1;
        let generation = control.generation;
        control.poll_task = Some(tokio::spawn(poll_loop(self.inner.clone(), generation)));
        trace!("Monitor for peer {} started", self.inner.peer_id);
    }

    /// Cancels the pending poll. Lifecycle listeners stay bound.
    pub fn stop(&self) {
        let mut control = self.inner.lock();
        if control.state == MonitorState::Destroyed {
            return;
        }
        if control.state == MonitorState::Active {
            control.state = MonitorState::Stopped;
        }
        if let Some(task) = control.poll_task.take() {
            task.abort();
        }
    }

    /// Stops polling, unbinds the listeners and releases the connection. Irreversible.
    pub fn destroy(&self) {
        {
            let mut control = self.inner.lock();
            if control.state == MonitorState::Destroyed {
                return;
            }
            control.state = MonitorState::Destroyed;
            if let Some(task) = control.poll_task.take() {
                task.abort();
            }
            control.connection = None;
        }
        self.inner.listeners.cancel();
        trace!("Monitor for peer {} destroyed", self.inner.peer_id);
    }

    pub fn state(&self) -> MonitorState {
        self.inner.lock().state
    }

    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn peer_name(&self) -> &str {
        &self.inner.peer_name
    }
}

impl Drop for PeerMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::core::{
        event::EventTag,
        stats::{StatRecord, StatsError, StatsResult},
    };

    struct MockConnection {
        polls: AtomicUsize,
        latency: Duration,
        failures: Mutex<VecDeque<StatsError>>,
        states: [Mutex<Vec<mpsc::UnboundedSender<String>>>; 4],
    }

    impl MockConnection {
        fn new() -> Arc<Self> {
            Self::with_latency(Duration::ZERO)
        }

        fn with_latency(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                polls: AtomicUsize::new(0),
                latency,
                failures: Mutex::new(VecDeque::new()),
                states: std::array::from_fn(|_| Mutex::new(Vec::new())),
            })
        }

        fn fail_next(&self, err: StatsError) {
            self.failures.lock().unwrap().push_back(err);
        }

        fn subscribers(
            &self,
            kind: StateKind,
        ) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<String>>> {
            let idx = StateKind::ALL.iter().position(|k| *k == kind).unwrap();
            self.states[idx].lock().unwrap()
        }

        fn set_state(&self, kind: StateKind, state: &str) {
            self.subscribers(kind).retain(|tx| tx.send(state.to_string()).is_ok());
        }

        fn listeners(&self, kind: StateKind) -> usize {
            self.subscribers(kind).iter().filter(|tx| !tx.is_closed()).count()
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerConnection for MockConnection {
        async fn get_stats(&self) -> StatsResult<StatsReport> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(vec![
                StatRecord::new("IA", "inbound-rtp")
                    .with_field("kind", "audio")
                    .with_field("jitter", 0.01),
                StatRecord::new("CP", "candidate-pair"),
            ]
            .into_iter()
            .collect())
        }

        fn subscribe_state(&self, kind: StateKind) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers(kind).push(tx);
            rx
        }
    }

    type Events = Arc<Mutex<Vec<Event>>>;

    fn monitor_with(connection: Arc<MockConnection>, options: MonitorOptions) -> (PeerMonitor, Events) {
        let events: Events = Arc::default();
        let sink = events.clone();
        let monitor = PeerMonitor::new(
            "peer-1",
            "Alice",
            connection,
            options,
            Arc::new(move |event| sink.lock().unwrap().push(event)),
        );
        (monitor, events)
    }

    fn one_second() -> MonitorOptions {
        MonitorOptions {
            get_stats_interval: Duration::from_millis(1000),
            ..MonitorOptions::default()
        }
    }

    fn names(events: &Events) -> Vec<&'static str> {
        events.lock().unwrap().iter().map(Event::name).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_fixed_interval() {
        let connection = MockConnection::new();
        let (monitor, events) = monitor_with(connection.clone(), one_second());

        monitor.start();
        monitor.start();
        assert_eq!(monitor.state(), MonitorState::Active);

        sleep(Duration::from_millis(999)).await;
        assert_eq!(connection.polls(), 0);

        sleep(Duration::from_millis(2600)).await;
        assert_eq!(connection.polls(), 3);
        assert_eq!(names(&events), vec!["stats"; 3]);

        let events = events.lock().unwrap();
        assert_eq!(events[0].peer_id, "peer-1");
        assert_eq!(events[0].peer_name, "Alice");
        assert_eq!(events[0].tag, EventTag::Stats);
        match &events[0].payload {
            EventPayload::Stats {
                data,
                raw_stats,
                stats_object,
            } => {
                assert_eq!(data.audio.inbound.len(), 1);
                assert_eq!(data.candidate_pair.len(), 1);
                assert!(raw_stats.is_none());
                assert!(stats_object.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_does_not_stop_loop() {
        let connection = MockConnection::new();
        connection.fail_next(StatsError::RequestFailed {
            reason: "transport closed".into(),
            detail: Some("getStats()".into()),
        });
        let (monitor, events) = monitor_with(connection.clone(), one_second());

        monitor.start();
        sleep(Duration::from_millis(2500)).await;

        assert_eq!(names(&events), vec!["error", "stats"]);
        let events = events.lock().unwrap();
        assert_eq!(events[0].tag, EventTag::Stats);
        match &events[0].payload {
            EventPayload::Error { error } => {
                assert_eq!(error.message, "Stats request failed: transport closed");
                assert_eq!(error.stack.as_deref(), Some("getStats()"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachments() {
        let connection = MockConnection::new();
        let (monitor, events) = monitor_with(
            connection,
            MonitorOptions {
                raw_stats: true,
                stats_object: true,
                ..one_second()
            },
        );

        monitor.start();
        sleep(Duration::from_millis(1001)).await;

        let value = serde_json::to_value(&events.lock().unwrap()[0]).unwrap();
        assert_eq!(value["rawStats"]["IA"]["kind"], json!("audio"));
        assert_eq!(value["statsObject"]["CP"]["type"], json!("candidate-pair"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_restart() {
        let connection = MockConnection::new();
        let (monitor, _events) = monitor_with(connection.clone(), one_second());

        monitor.start();
        sleep(Duration::from_millis(1500)).await;
        monitor.stop();
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Stopped);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connection.polls(), 1);

        monitor.start();
        sleep(Duration::from_millis(1001)).await;
        assert_eq!(connection.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changes_forwarded() {
        let connection = MockConnection::new();
        let (monitor, events) = monitor_with(connection.clone(), one_second());

        connection.set_state(StateKind::IceConnection, "checking");
        sleep(Duration::from_millis(1)).await;
        connection.set_state(StateKind::Signaling, "have-local-offer");
        sleep(Duration::from_millis(1)).await;

        // Forwarding is independent of polling.
        assert_eq!(monitor.state(), MonitorState::Idle);
        assert_eq!(
            names(&events),
            vec!["iceConnectionStateChange", "signalingStateChange"]
        );
        let events = events.lock().unwrap();
        assert_eq!(events[0].tag, EventTag::Connection);
        let value = serde_json::to_value(&events[1]).unwrap();
        assert_eq!(value["data"]["state"], json!("have-local-offer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_changes_each_forwarded_in_order() {
        let connection = MockConnection::new();
        let (_monitor, events) = monitor_with(connection.clone(), one_second());

        connection.set_state(StateKind::IceConnection, "checking");
        connection.set_state(StateKind::IceConnection, "connected");
        connection.set_state(StateKind::IceConnection, "completed");
        sleep(Duration::from_millis(5)).await;

        let states: Vec<serde_json::Value> = events
            .lock()
            .unwrap()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["data"]["state"].clone())
            .collect();
        assert_eq!(states, vec![json!("checking"), json!("connected"), json!("completed")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_listeners() {
        let connection = MockConnection::new();
        let (monitor, events) = monitor_with(connection.clone(), one_second());

        monitor.start();
        monitor.stop();
        connection.set_state(StateKind::Connection, "connected");
        sleep(Duration::from_millis(1)).await;

        assert_eq!(names(&events), vec!["connectionStateChange"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_unbinds_and_releases() {
        let connection = MockConnection::new();
        let (monitor, events) = monitor_with(connection.clone(), one_second());
        monitor.start();

        for kind in StateKind::ALL {
            assert_eq!(connection.listeners(kind), 1);
        }

        monitor.destroy();
        monitor.destroy();
        monitor.start();
        assert_eq!(monitor.state(), MonitorState::Destroyed);
        sleep(Duration::from_millis(1)).await;

        for kind in StateKind::ALL {
            assert_eq!(connection.listeners(kind), 0);
        }
        assert_eq!(Arc::strong_count(&connection), 1);

        connection.set_state(StateKind::Connection, "closed");
        sleep(Duration::from_secs(10)).await;
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(connection.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_poll_after_destroy_emits_nothing() {
        let connection = MockConnection::with_latency(Duration::from_millis(500));
        let (monitor, events) = monitor_with(connection.clone(), one_second());

        monitor.start();
        sleep(Duration::from_millis(1200)).await;
        assert_eq!(connection.polls(), 1);

        monitor.destroy();
        sleep(Duration::from_secs(5)).await;

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(connection.polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_destroys() {
        let connection = MockConnection::new();
        let (monitor, _events) = monitor_with(connection.clone(), one_second());
        monitor.start();

        drop(monitor);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(Arc::strong_count(&connection), 1);
    }
}
