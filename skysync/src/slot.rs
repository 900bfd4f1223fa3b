//! Per-category synchronization slot.
//!
//! A slot serializes the requests of one category group: a FIFO of pending
//! requests and at most one active request/transport pair at any time. This
//! bounds concurrent transport operations per category and preserves
//! temporal locality when a stream of nearby tiles arrives.
//!
//! Slots are owned and mutated exclusively by the scheduler worker thread.

use crate::request::{SyncRequest, SyncStatus};
use crate::transport::{SyncClient, SyncFault};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::warn;

/// What one poll of a slot produced.
#[derive(Debug)]
pub(crate) enum SlotPoll {
    /// No active operation.
    Idle,
    /// The active operation is still making progress.
    Running,
    /// The active operation finished; the request carries its terminal
    /// status and `fault` the failure, if any.
    Finished {
        request: SyncRequest,
        fault: Option<SyncFault>,
    },
}

pub(crate) struct SyncSlot {
    name: &'static str,
    pending: VecDeque<SyncRequest>,
    active: Option<SyncRequest>,
    client: Option<Box<dyn SyncClient>>,
    pending_bytes: u64,
    pending_extract_bytes: u64,
    started_at: Instant,
    /// Elapsed time at which the next slow-sync warning fires; doubles per
    /// re-trigger.
    next_warn: Duration,
    warn_base: Duration,
}

impl SyncSlot {
    pub(crate) fn new(name: &'static str, warn_base: Duration) -> Self {
        Self {
            name,
            pending: VecDeque::new(),
            active: None,
            client: None,
            pending_bytes: 0,
            pending_extract_bytes: 0,
            started_at: Instant::now(),
            next_warn: warn_base,
            warn_base,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a request to the pending FIFO.
    pub(crate) fn push(&mut self, request: SyncRequest) {
        self.pending.push_back(request);
    }

    /// Pops the next request to start, preserving submission order.
    pub(crate) fn pop_pending(&mut self) -> Option<SyncRequest> {
        self.pending.pop_front()
    }

    /// Marks `request` active with its freshly begun transport operation.
    pub(crate) fn activate(&mut self, request: SyncRequest, client: Box<dyn SyncClient>) {
        debug_assert!(self.active.is_none() && self.client.is_none());
        self.pending_bytes = client.bytes_to_download();
        self.pending_extract_bytes = client.bytes_to_extract();
        self.started_at = Instant::now();
        self.next_warn = self.warn_base;
        self.active = Some(request);
        self.client = Some(client);
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    pub(crate) fn pending_extract_bytes(&self) -> u64 {
        self.pending_extract_bytes
    }

    #[cfg(test)]
    pub(crate) fn pending_paths(&self) -> Vec<&str> {
        self.pending.iter().map(|r| r.path.as_str()).collect()
    }

    /// Advances the active operation one non-blocking step.
    pub(crate) fn poll(&mut self) -> SlotPoll {
        let Some(mut client) = self.client.take() else {
            return SlotPoll::Idle;
        };
        client.update();

        if client.is_active() {
            self.pending_bytes = client.bytes_to_download();
            self.pending_extract_bytes = client.bytes_to_extract();
            self.warn_if_slow(client.as_ref());
            self.client = Some(client);
            return SlotPoll::Running;
        }

        let fault = client.failure();
        let mut request = match self.active.take() {
            Some(request) => request,
            // A client without an owning request cannot be reported; treat
            // the slot as idle.
            None => return SlotPoll::Idle,
        };
        request.status = match fault {
            None => SyncStatus::Updated,
            Some(SyncFault::NotFound) => SyncStatus::NotFound,
            Some(SyncFault::Other(_)) => SyncStatus::Failed,
        };
        self.pending_bytes = 0;
        self.pending_extract_bytes = 0;
        SlotPoll::Finished { request, fault }
    }

    fn warn_if_slow(&mut self, client: &dyn SyncClient) {
        let elapsed = self.started_at.elapsed();
        if elapsed >= self.next_warn {
            let path = self
                .active
                .as_ref()
                .map(|r| r.path.as_str())
                .unwrap_or_default();
            warn!(
                slot = self.name,
                path,
                url = client.base_url(),
                elapsed_secs = elapsed.as_secs(),
                "synchronization is taking unusually long"
            );
            self.next_warn *= 2;
        }
    }

    /// Abandons the active operation, requeueing its request at the front so
    /// it restarts after a reinit. Used when the scheduler stalls.
    pub(crate) fn abandon_active(&mut self) {
        self.client = None;
        if let Some(request) = self.active.take() {
            self.pending.push_front(request);
        }
        self.pending_bytes = 0;
        self.pending_extract_bytes = 0;
    }

    /// Discards everything. Used on explicit stop; a late transport result
    /// is simply dropped with the client.
    pub(crate) fn reset(&mut self) -> usize {
        let discarded = self.pending.len() + usize::from(self.active.is_some());
        self.pending.clear();
        self.active = None;
        self.client = None;
        self.pending_bytes = 0;
        self.pending_extract_bytes = 0;
        discarded
    }
}

impl std::fmt::Debug for SyncSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSlot")
            .field("name", &self.name)
            .field("pending", &self.pending.len())
            .field("busy", &self.is_busy())
            .finish()
    }
}
