//! Work queue feeding keys to reconcile workers.
//!
//! Guarantees:
//! - a key waiting in the queue is held once, however often it is added
//! - a key is handed to at most one worker at a time; adding it while it is
//!   being processed parks it until the worker calls [`WorkQueue::done`]
//! - failed keys come back after an exponential per-key backoff

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tmplsync_core::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

/// Delay before the `failures`-th retry: `base * 2^failures`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1_u32.checked_shl(failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// Deduplicating, rate-limited work queue of record keys.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl WorkQueue {
    /// Create a queue with the given requeue backoff bounds.
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            backoff_base,
            backoff_max,
        }
    }

    /// Enqueue a key now.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // Picked up again by `done`.
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Enqueue a key after `delay`.
    ///
    /// The delay runs in a detached task that shutdown does not wait for; a
    /// key arriving after [`WorkQueue::shutdown`] is dropped by `add`.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Enqueue a key after its backoff delay and count the failure.
    /// Returns the delay used.
    pub async fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff_delay(self.backoff_base, self.backoff_max, *failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of a key.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    /// Number of failures recorded for a key since it was last forgotten.
    pub async fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up between check and await is kept.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    trace!(template = %key, "Dequeued key");
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark a key as processed, re-queueing it if it was added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Number of keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether no key is waiting to be handed out.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.ready.notify_waiters();
    }
}
