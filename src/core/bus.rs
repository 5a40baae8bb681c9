//! Local publish/subscribe surface.
//!
//! Channels are plain strings: every event kind publishes under its own name,
//! so a new kind needs no registration here. Listeners run synchronously on the
//! emitting task, in registration order. A panicking listener is logged and
//! skipped; it never reaches the emitter or the other listeners.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::error;

use super::{event::Event, transport::DeliveryError};

/// Well-known channel names.
pub mod channels {
    /// Every handled event.
    pub const TIMELINE: &str = "timeline";
    /// Poll results.
    pub const STATS: &str = "stats";
    /// A batch was delivered.
    pub const EXPORT_SUCCESS: &str = "export:success";
    /// A batch was dropped after its final attempt.
    pub const EXPORT_ERROR: &str = "export:error";
}

/// What a listener receives.
#[derive(Debug, Clone)]
pub enum Notification {
    Event(Arc<Event>),
    ExportSuccess {
        count: usize,
        session_id: String,
    },
    /// Carries the undelivered batch so a listener can persist or requeue it.
    ExportError {
        error: DeliveryError,
        count: usize,
        items: Arc<Vec<Arc<Event>>>,
    },
}

impl Notification {
    pub fn as_event(&self) -> Option<&Arc<Event>> {
        match self {
            Notification::Event(event) => Some(event),
            _ => None,
        }
    }
}

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    channels: HashMap<String, Vec<Listener>>,
}

/// Channel registry. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register<F>(&self, channel: &str, once: bool, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.next_id += 1;
        let id = ListenerId(state.next_id);
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(Listener {
                id,
                once,
                callback: Arc::new(callback),
            });
        id
    }

    /// Registers `callback` on `channel`.
    pub fn on<F>(&self, channel: &str, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(channel, false, callback)
    }

    /// Registers `callback` for the next emission on `channel` only.
    pub fn once<F>(&self, channel: &str, callback: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(channel, true, callback)
    }

    /// Removes one listener. Returns whether it was registered.
    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(listeners) = state.channels.get_mut(channel) else {
            return false;
        };

        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            state.channels.remove(channel);
        }
        removed
    }

    /// Removes every listener of `channel`, or of every channel when `None`.
    pub fn remove_all_listeners(&self, channel: Option<&str>) {
        let mut state = self.lock();
        match channel {
            Some(channel) => {
                state.channels.remove(channel);
            }
            None => state.channels.clear(),
        }
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, Vec::len)
    }

    /// Delivers `notification` to every listener of `channel`.
    ///
    /// Returns `false` when the channel had no listeners.
    pub fn emit(&self, channel: &str, notification: &Notification) -> bool {
        let callbacks: Vec<Callback> = {
            let mut state = self.lock();
            let Some(listeners) = state.channels.get_mut(channel) else {
                return false;
            };

            let callbacks = listeners.iter().map(|l| l.callback.clone()).collect();
            listeners.retain(|l| !l.once);
            if listeners.is_empty() {
                state.channels.remove(channel);
            }
            callbacks
        };

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(notification))).is_err() {
                error!("Listener on '{}' panicked", channel);
            }
        }

        !callbacks.is_empty()
    }
}
