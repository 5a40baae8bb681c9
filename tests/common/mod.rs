#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use peerwatch::{
    config::ExporterConfig,
    core::stats::StatsResult,
    DeliveryError, Envelope, Notification, PeerConnection, StatRecord, StateKind, StatsError,
    StatsReport, Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Connection whose stats always succeed unless a failure was queued.
pub struct MockConnection {
    polls: AtomicUsize,
    failures: Mutex<VecDeque<StatsError>>,
    states: [Mutex<Vec<mpsc::UnboundedSender<String>>>; 4],
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            polls: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            states: std::array::from_fn(|_| Mutex::new(Vec::new())),
        })
    }

    pub fn fail_next(&self, err: StatsError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Notifies every live subscriber of `kind`, dropping deregistered ones.
    pub fn set_state(&self, kind: StateKind, state: &str) {
        self.subscribers(kind).retain(|tx| tx.send(state.to_string()).is_ok());
    }

    fn subscribers(&self, kind: StateKind) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<String>>> {
        let idx = StateKind::ALL.iter().position(|k| *k == kind).unwrap();
        self.states[idx].lock().unwrap()
    }

    /// Registrations still held across all four properties.
    pub fn listeners(&self) -> usize {
        StateKind::ALL
            .iter()
            .map(|kind| self.subscribers(*kind).iter().filter(|tx| !tx.is_closed()).count())
            .sum()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn get_stats(&self) -> StatsResult<StatsReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(vec![
            StatRecord::new("IA", "inbound-rtp")
                .with_field("kind", "audio")
                .with_field("packetsLost", 0),
            StatRecord::new("OV", "outbound-rtp").with_field("kind", "video"),
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

/// Transport that replays scripted outcomes, then succeeds.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<DeliveryError>>,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<Value>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, err: DeliveryError) {
        self.script.lock().unwrap().push_back(err);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Envelopes accepted so far, as JSON.
    pub fn delivered(&self) -> Vec<Value> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_counts(&self) -> Vec<u64> {
        self.delivered()
            .iter()
            .map(|e| e["count"].as_u64().unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap()
            .push(serde_json::to_value(envelope).unwrap());
        Ok(())
    }
}

pub fn config(batch_size: usize, get_stats_interval: u64, flush_interval: u64) -> ExporterConfig {
    ExporterConfig {
        session_id: Some("session-test".into()),
        session_name: "test-call".into(),
        batch_size,
        get_stats_interval,
        flush_interval,
        ..ExporterConfig::default()
    }
}

/// Collects every notification published on one channel.
pub type Recorded = Arc<Mutex<Vec<Notification>>>;

pub fn recorder() -> (Recorded, impl Fn(&Notification) + Send + Sync + 'static) {
    let seen: Recorded = Arc::default();
    let sink = seen.clone();
    (seen, move |n: &Notification| sink.lock().unwrap().push(n.clone()))
}

pub fn event_names(recorded: &Recorded) -> Vec<&'static str> {
    recorded
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| n.as_event().map(|e| e.name()))
        .collect()
}
