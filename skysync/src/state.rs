//! Cross-thread-visible scheduler state.
//!
//! [`SchedulerState`] is the only data other threads ever read about the
//! worker's progress. It is published and read as a whole under a single
//! mutex, so partial reads are never observable and two reads with no
//! scheduler progress in between return identical values.
//!
//! [`InFlightSet`] mirrors the paths currently accepted into slot queues or
//! actively synchronizing. Slots themselves are owned exclusively by the
//! worker thread; this set is what makes the `is_active` query answerable
//! from any thread, and what the worker consults for global dedup at drain
//! time.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Instant;

/// Aggregate snapshot of the scheduler, recomputed once per worker iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    /// Worker thread is alive.
    pub running: bool,
    /// Synchronization is paused pending backoff expiry.
    pub stalled: bool,
    /// A mirror server has been resolved.
    pub has_server: bool,

    /// Slots with an active transport operation.
    pub busy: u32,
    /// Transient errors since the last success.
    pub consecutive_errors: u32,
    /// Requests finished as `Updated`.
    pub success_count: u64,
    /// Requests finished as `Failed`.
    pub fail_count: u64,
    /// Terrain requests finished as `Updated`.
    pub updated_tile_count: u64,

    /// Recent download rate, bytes per second.
    pub transfer_rate_bytes_sec: u64,
    /// Engine-wide cumulative bytes downloaded.
    pub total_bytes_downloaded: u64,
    /// Bytes still to download across all slots.
    pub total_pending_bytes: u64,
    /// Bytes still to extract across all slots.
    pub total_pending_extract_bytes: u64,

    /// When a stalled scheduler may be reinitialized. The worker never
    /// self-wakes; the facade observes this and posts a reinit.
    pub stalled_until: Option<Instant>,
}

/// Shared holder of the latest [`SchedulerState`].
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<SchedulerState>,
}

impl SharedState {
    /// Creates a holder with a default (not running) state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot as a whole.
    pub fn publish(&self, state: SchedulerState) {
        *self.inner.lock() = state;
    }

    /// Copies the current snapshot out.
    pub fn snapshot(&self) -> SchedulerState {
        self.inner.lock().clone()
    }
}

/// Set of paths accepted into a slot and not yet terminal.
#[derive(Debug, Default)]
pub struct InFlightSet {
    paths: Mutex<HashSet<String>>,
}

impl InFlightSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` as in flight. Returns false if it already was.
    pub fn insert(&self, path: &str) -> bool {
        self.paths.lock().insert(path.to_owned())
    }

    /// True if `path` is in flight.
    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().contains(path)
    }

    /// Removes `path` once its request reaches a terminal status.
    pub fn remove(&self, path: &str) {
        self.paths.lock().remove(path);
    }

    /// Forgets everything (worker shutdown).
    pub fn clear(&self) {
        self.paths.lock().clear();
    }

    /// Number of in-flight paths.
    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    /// True if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }
}
