//! The synchronization service facade.
//!
//! [`SyncService`] is what the host application owns. It spawns the worker
//! thread, accepts requests from any thread, and is driven once per frame via
//! [`SyncService::update`], which hands back newly completed requests and
//! reinitializes a stalled worker whose backoff has expired. The worker never
//! wakes itself out of a stall; without update calls it stays stalled
//! indefinitely.

use crate::config::SyncConfig;
use crate::discovery::MirrorLookup;
use crate::error::ServiceError;
use crate::queue::{CompletedQueue, QueueMessage, RequestQueue};
use crate::request::{SyncCategory, SyncRequest};
use crate::scheduler::Scheduler;
use crate::state::{InFlightSet, SchedulerState, SharedState};
use crate::transport::SyncClientFactory;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info};

pub struct SyncService {
    config: SyncConfig,
    factory: Arc<dyn SyncClientFactory>,
    lookup: Option<Arc<dyn MirrorLookup>>,

    queue: Arc<RequestQueue>,
    completed: Arc<CompletedQueue>,
    in_flight: Arc<InFlightSet>,
    shared: Arc<SharedState>,

    worker: Option<JoinHandle<()>>,
    reinit_posted: bool,
}

impl SyncService {
    /// Creates a stopped service. `lookup` of `None` disables discovery and
    /// relies on the configured fallback server.
    pub fn new(
        config: SyncConfig,
        factory: Arc<dyn SyncClientFactory>,
        lookup: Option<Arc<dyn MirrorLookup>>,
    ) -> Self {
        let completed = Arc::new(CompletedQueue::new(config.completed_capacity));
        Self {
            config,
            factory,
            lookup,
            queue: Arc::new(RequestQueue::new()),
            completed,
            in_flight: Arc::new(InFlightSet::new()),
            shared: Arc::new(SharedState::new()),
            worker: None,
            reinit_posted: false,
        }
    }

    /// Spawns the worker thread. Fails if the service is already running.
    ///
    /// Each start resolves the mirror server afresh; a previous run's
    /// selection is never reused.
    pub fn start(&mut self) -> Result<(), ServiceError> {
        if self.worker.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let scheduler = Scheduler::new(
            self.config.clone(),
            Arc::clone(&self.factory),
            self.lookup.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.completed),
            Arc::clone(&self.in_flight),
            Arc::clone(&self.shared),
        );
        let handle = std::thread::Builder::new()
            .name("skysync-worker".into())
            .spawn(move || scheduler.run())
            .map_err(ServiceError::SpawnFailed)?;

        self.worker = Some(handle);
        self.reinit_posted = false;
        info!(root = %self.config.local_root.display(), "synchronization service started");
        Ok(())
    }

    /// Stops the worker, discarding all queued and in-flight work, and waits
    /// for the thread to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.queue.push_control(QueueMessage::Stop);
        if handle.join().is_err() {
            debug!("worker thread panicked during shutdown");
        }
        self.reinit_posted = false;
        info!("synchronization service stopped");
    }

    /// Enqueues a synchronization request. Never blocks; duplicates of paths
    /// already queued or in flight are discarded by the worker.
    pub fn request_sync(&self, path: impl Into<String>, category: SyncCategory) {
        self.queue.submit(SyncRequest::new(path, category));
    }

    /// Per-frame drive. Returns the requests that reached a terminal status
    /// since the previous call, and reinitializes a stalled worker once its
    /// backoff deadline has passed.
    pub fn update(&mut self) -> Vec<SyncRequest> {
        let state = self.shared.snapshot();
        if state.stalled {
            if !self.reinit_posted
                && state.stalled_until.is_some_and(|until| Instant::now() >= until)
            {
                debug!("backoff expired, posting reinit");
                self.queue.push_control(QueueMessage::Reinit);
                self.reinit_posted = true;
            }
        } else {
            self.reinit_posted = false;
        }
        self.completed.drain()
    }

    /// Whether `path` is queued or actively synchronizing.
    pub fn is_active(&self, path: &str) -> bool {
        self.queue.contains(path) || self.in_flight.contains(path)
    }

    /// Consistent snapshot of the worker's state.
    pub fn state(&self) -> SchedulerState {
        self.shared.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_stalled(&self) -> bool {
        self.shared.snapshot().stalled
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.stop();
    }
}
