//! Thread-safe queues between caller threads and the scheduler worker.
//!
//! [`RequestQueue`] is the multi-producer/single-consumer intake: any thread
//! may [`submit`](RequestQueue::submit) without ever blocking, and only the
//! worker drains it. Control sentinels (`Stop`, `Reinit`) travel on the same
//! queue so the worker has exactly one thing to wait on.
//!
//! [`CompletedQueue`] carries finished requests back to whoever cares. It is
//! best-effort by design: a bounded ring that drops the oldest entry under
//! unbounded accumulation, since nothing in the core depends on observing
//! every individual completion.

use crate::request::SyncRequest;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Default capacity of the completion ring.
pub const DEFAULT_COMPLETED_CAPACITY: usize = 256;

/// A message accepted by the scheduler worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// Synchronize one directory.
    Sync(SyncRequest),
    /// Leave the stalled state and re-resolve a server.
    Reinit,
    /// Shut the worker down, abandoning in-flight work.
    Stop,
}

// =============================================================================
// Request Queue
// =============================================================================

/// Blocking MPSC deque of [`QueueMessage`].
///
/// Duplicate submissions of the same path are *not* deduplicated here; the
/// scheduler applies global dedup at drain time so that the check can also
/// cover slot queues and the active requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<QueueMessage>>,
    wakeup: Condvar,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a synchronization request. Never blocks, always succeeds.
    pub fn submit(&self, request: SyncRequest) {
        self.inner.lock().push_back(QueueMessage::Sync(request));
        self.wakeup.notify_one();
    }

    /// Appends a control sentinel and wakes the worker.
    pub fn push_control(&self, message: QueueMessage) {
        self.inner.lock().push_back(message);
        self.wakeup.notify_one();
    }

    /// Atomically empties the queue, returning its contents in FIFO order.
    ///
    /// Called only by the scheduler worker.
    pub fn drain_all(&self) -> Vec<QueueMessage> {
        self.inner.lock().drain(..).collect()
    }

    /// Blocks until the queue is non-empty or the timeout elapses.
    ///
    /// Used by the worker instead of spinning when there is nothing to do.
    pub fn wait_for_work(&self, timeout: Duration) {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.wakeup.wait_for(&mut queue, timeout);
        }
    }

    /// True if a not-yet-drained request for `path` is queued.
    pub fn contains(&self, path: &str) -> bool {
        self.inner
            .lock()
            .iter()
            .any(|m| matches!(m, QueueMessage::Sync(r) if r.path == path))
    }

    /// Discards all pending entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// =============================================================================
// Completed Queue
// =============================================================================

/// Bounded ring of finished requests, drained by the facade once per frame.
#[derive(Debug)]
pub struct CompletedQueue {
    inner: Mutex<VecDeque<SyncRequest>>,
    capacity: usize,
}

impl CompletedQueue {
    /// Creates a ring holding at most `capacity` completions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
        }
    }

    /// Records a completion, evicting the oldest entry when full.
    pub fn push(&self, request: SyncRequest) {
        let mut ring = self.inner.lock();
        if ring.len() == self.capacity {
            let dropped = ring.pop_front();
            if let Some(dropped) = dropped {
                tracing::trace!(path = %dropped.path, "completion ring full, dropping oldest entry");
            }
        }
        ring.push_back(request);
    }

    /// Removes and returns all recorded completions in FIFO order.
    pub fn drain(&self) -> Vec<SyncRequest> {
        self.inner.lock().drain(..).collect()
    }

    /// Number of undrained completions.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if no completions are waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for CompletedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_CAPACITY)
    }
}
