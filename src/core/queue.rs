//! Size- and time-triggered batch queue.
//!
//! Items are flushed in push order, at most `batch_size` per callback, and
//! the callback is never running twice at once for the same queue. A flush
//! starts when the queue reaches `batch_size` or when the flush timer fires,
//! whichever comes first. Items that arrive while a flush is in progress are
//! picked up by an immediate follow-up flush once it completes.
//!
//! The timer and the callback run on spawned tokio tasks, so `start`, `push`
//! and `flush` must be called from within a runtime.

use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures_util::{future::BoxFuture, FutureExt};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{error, trace};

/// Flush callback. Failures are the callback's own to contain.
pub type FlushFn<T> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchQueueOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchQueueOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(5000),
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    flushing: bool,
    stopped: bool,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is replaced or cancelled.
    timer_generation: u64,
}

struct Inner<T> {
    batch_size: usize,
    flush_interval: Duration,
    on_flush: FlushFn<T>,
    state: Mutex<QueueState<T>>,
    /// Signalled each time a flush callback returns.
    idle: Notify,
}

enum FlushStep<T> {
    Wait,
    Run(Vec<T>),
    Done,
}

/// FIFO buffer in front of an asynchronous batch consumer.
pub struct BatchQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn cancel_timer<T>(state: &mut QueueState<T>) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.timer_generation += 1;
}

impl<T: Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the next batch, or re-arms the timer when a flush is already
    /// running or nothing is queued.
    fn take_batch(self: &Arc<Self>, state: &mut QueueState<T>) -> Option<Vec<T>> {
        if state.flushing || state.items.is_empty() {
            self.schedule_timer(state);
            return None;
        }

        state.flushing = true;
        let n = state.items.len().min(self.batch_size);
        Some(state.items.drain(..n).collect())
    }

    fn schedule_timer(self: &Arc<Self>, state: &mut QueueState<T>) {
        if state.stopped {
            return;
        }
        cancel_timer(state);

        let generation = state.timer_generation;
        let interval = self.flush_interval;
        let weak: Weak<Self> = Arc::downgrade(self);

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let batch = {
                let mut state = inner.lock();
                if state.timer_generation != generation {
                    return;
                }
                // Detach before draining so a reschedule cannot abort this task.
                state.timer = None;
                inner.take_batch(&mut state)
            };

            if let Some(batch) = batch {
                trace!("Flush timer fired with {} items", batch.len());
                inner.run(batch).await;
            }
        }));
    }

    /// Hands `batch` to the callback, then keeps going while items remain.
    async fn run(self: Arc<Self>, mut batch: Vec<T>) {
        loop {
            let on_flush = self.on_flush.clone();
            let flush = async move { on_flush(batch).await };
            if AssertUnwindSafe(flush).catch_unwind().await.is_err() {
                error!("Batch flush callback panicked; batch dropped");
            }

            let next = {
                let mut state = self.lock();
                state.flushing = false;
                self.take_batch(&mut state)
            };
            self.idle.notify_waiters();

            match next {
                Some(following) => batch = following,
                None => return,
            }
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl<T: Send + 'static> BatchQueue<T> {
    pub fn new<F>(options: BatchQueueOptions, on_flush: F) -> Self
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                batch_size: options.batch_size.max(1),
                flush_interval: options.flush_interval,
                on_flush: Arc::new(on_flush),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    flushing: false,
                    stopped: true,
                    timer: None,
                    timer_generation: 0,
                }),
                idle: Notify::new(),
            }),
        }
    }

    /// Arms the flush timer. Until then only the size trigger flushes.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        state.stopped = false;
        self.inner.schedule_timer(&mut state);
    }

    /// Cancels the flush timer and keeps it disarmed. Queued items stay queued.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.stopped = true;
        cancel_timer(&mut state);
    }

    /// Appends `item`, flushing at once when the queue reaches `batch_size`.
    pub fn push(&self, item: T) {
        let batch = {
            let mut state = self.inner.lock();
            state.items.push_back(item);
            if state.items.len() < self.inner.batch_size {
                return;
            }
            cancel_timer(&mut state);
            self.inner.take_batch(&mut state)
        };

        if let Some(batch) = batch {
            tokio::spawn(self.inner.clone().run(batch));
        }
    }

    /// Flushes everything queued, bypassing the timer.
    ///
    /// Waits for an in-flight flush first, so on return every item pushed
    /// before the call has been handed to the callback.
    pub async fn flush(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            let step = {
                let mut state = self.inner.lock();
                cancel_timer(&mut state);
                if state.flushing {
                    FlushStep::Wait
                } else if state.items.is_empty() {
                    self.inner.schedule_timer(&mut state);
                    FlushStep::Done
                } else {
                    match self.inner.take_batch(&mut state) {
                        Some(batch) => FlushStep::Run(batch),
                        None => FlushStep::Done,
                    }
                }
            };

            match step {
                FlushStep::Wait => idle.await,
                // Spawned so that dropping this future cannot leave the queue flushing.
                FlushStep::Run(batch) => {
                    let _ = tokio::spawn(self.inner.clone().run(batch)).await;
                }
                FlushStep::Done => return,
            }
        }
    }

    /// Number of queued items not yet handed to the callback.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
