//! Keyed one-shot timers with replace-on-reschedule semantics.
//!
//! Scheduling a key that already has a pending timer drops the old action and
//! deadline. A fired entry is removed before its action runs, so an action that
//! reschedules its own key creates a fresh entry. Timing uses `tokio::time`, which
//! makes the scheduler follow a paused test clock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::poll_fn;
use std::hash::Hash;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::trace;

pub type ExpirationAction = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    timer: delay_queue::Key,
    action: ExpirationAction,
}

struct Inner<K> {
    queue: DelayQueue<K>,
    entries: HashMap<K, Entry>,
    waker: Option<Waker>,
}

impl<K> Inner<K> {
    fn wake_driver(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

pub struct ExpirationScheduler<K> {
    inner: Arc<Mutex<Inner<K>>>,
    shutdown: CancellationToken,
}

impl<K> ExpirationScheduler<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    /// Create the scheduler and spawn its driver task on the current runtime.
    ///
    /// The driver exits when `shutdown` (or a parent token) is cancelled.
    pub fn new(name: &'static str, shutdown: CancellationToken) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            queue: DelayQueue::new(),
            entries: HashMap::new(),
            waker: None,
        }));

        tokio::spawn(drive(name, Arc::clone(&inner), shutdown.clone()));
        Self { inner, shutdown }
    }

    /// Run `action` once `delay` elapses, replacing any pending action for `key`.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.remove(&key) {
            inner.queue.remove(&previous.timer);
        }
        let timer = inner.queue.insert(key.clone(), delay);
        inner.entries.insert(
            key,
            Entry {
                timer,
                action: Box::new(action),
            },
        );
        inner.wake_driver();
    }

    /// Drop the pending action for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(key) {
            Some(entry) => {
                inner.queue.remove(&entry.timer);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the driver and discard every pending action without running it.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.queue.clear();
        inner.wake_driver();
    }
}

fn poll_expired<K>(inner: &Mutex<Inner<K>>, cx: &mut Context<'_>) -> Poll<(K, ExpirationAction)>
where
    K: Clone + Eq + Hash,
{
    let mut inner = inner.lock();
    loop {
        match inner.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let key = expired.into_inner();
                if let Some(entry) = inner.entries.remove(&key) {
                    return Poll::Ready((key, entry.action));
                }
            }
            // an empty queue reports Ready(None) instead of parking, so park here
            Poll::Ready(None) | Poll::Pending => {
                inner.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
        }
    }
}

async fn drive<K>(name: &'static str, inner: Arc<Mutex<Inner<K>>>, shutdown: CancellationToken)
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    loop {
        let (key, action) = tokio::select! {
            _ = shutdown.cancelled() => break,
            fired = poll_fn(|cx| poll_expired(&inner, cx)) => fired,
        };
        trace!(scheduler = name, ?key, "Expiration fired");
        action();
    }
    trace!(scheduler = name, "Expiration driver stopped");
}
