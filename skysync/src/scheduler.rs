//! The scheduler worker loop.
//!
//! Exactly one dedicated background thread runs [`Scheduler::run`]. Each
//! iteration it drains the request queue into the per-category slots
//! (applying global dedup), advances every slot's transport operation one
//! non-blocking step, and republishes the aggregate [`SchedulerState`]
//! snapshot. All slot data is owned by this thread; other threads only see
//! the queue, the in-flight path set, and the published snapshot.
//!
//! # State machine
//!
//! ```text
//! NoServer ──► Resolving ──► Active ──► Stalled ──► (stopped)
//!                  ▲                        │
//!                  └──────── reinit ────────┘
//! ```
//!
//! Failure policy: transient errors (transport failures, resolution
//! failures) increment `consecutive_errors`; any success resets it. Crossing
//! the configured threshold stalls the scheduler, which backs off for
//! `uniform(0, ceiling)` where the ceiling grows by 60 s per stall episode up
//! to 15 min. The worker never self-wakes: the facade observes the recorded
//! wake timestamp and posts a `Reinit` sentinel once it has passed. `NotFound`
//! outcomes and failures of an unconfigured optional sub-service never count
//! toward the threshold.

use crate::config::SyncConfig;
use crate::discovery::MirrorLookup;
use crate::queue::{CompletedQueue, QueueMessage, RequestQueue};
use crate::request::{SyncCategory, SyncRequest, SyncStatus, NUM_SLOTS, SLOT_NAMES};
use crate::selector::ServerSelector;
use crate::slot::{SlotPoll, SyncSlot};
use crate::state::{InFlightSet, SchedulerState, SharedState};
use crate::transport::{SyncClientFactory, SyncFault};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum spacing between transfer-rate samples.
const RATE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NoServer,
    Resolving,
    Active,
    Stalled,
}

pub(crate) struct Scheduler {
    config: SyncConfig,
    factory: Arc<dyn SyncClientFactory>,
    queue: Arc<RequestQueue>,
    completed: Arc<CompletedQueue>,
    in_flight: Arc<InFlightSet>,
    shared: Arc<SharedState>,

    selector: ServerSelector<StdRng>,
    slots: [SyncSlot; NUM_SLOTS],
    phase: Phase,
    server: Option<String>,

    consecutive_errors: u32,
    success_count: u64,
    fail_count: u64,
    updated_tile_count: u64,

    backoff_ceiling: Duration,
    stalled_until: Option<Instant>,

    transfer_rate: u64,
    last_sample: Instant,
    last_sample_bytes: u64,

    warned_unconfigured: bool,
    rng: StdRng,
}

impl Scheduler {
    pub(crate) fn new(
        config: SyncConfig,
        factory: Arc<dyn SyncClientFactory>,
        lookup: Option<Arc<dyn MirrorLookup>>,
        queue: Arc<RequestQueue>,
        completed: Arc<CompletedQueue>,
        in_flight: Arc<InFlightSet>,
        shared: Arc<SharedState>,
    ) -> Self {
        let seed = config.rng_seed.unwrap_or_else(|| rand::rng().random());
        let selector = ServerSelector::new(
            config.service_name.clone(),
            lookup,
            config.fallback_server.clone(),
            StdRng::seed_from_u64(seed.wrapping_add(1)),
        );
        let warn_base = config.slow_sync_warning;
        let last_sample_bytes = factory.total_bytes_downloaded();

        Self {
            selector,
            slots: std::array::from_fn(|i| SyncSlot::new(SLOT_NAMES[i], warn_base)),
            phase: Phase::NoServer,
            server: None,
            consecutive_errors: 0,
            success_count: 0,
            fail_count: 0,
            updated_tile_count: 0,
            backoff_ceiling: Duration::ZERO,
            stalled_until: None,
            transfer_rate: 0,
            last_sample: Instant::now(),
            last_sample_bytes,
            warned_unconfigured: false,
            rng: StdRng::seed_from_u64(seed),
            config,
            factory,
            queue,
            completed,
            in_flight,
            shared,
        }
    }

    /// Runs until a stop sentinel arrives.
    pub(crate) fn run(mut self) {
        info!(service = %self.config.service_name, "synchronization scheduler starting");
        self.publish();
        while self.step() {
            self.pace();
        }
        info!("synchronization scheduler stopped");
    }

    /// One scheduler iteration. Returns false once a stop sentinel was seen.
    fn step(&mut self) -> bool {
        for message in self.queue.drain_all() {
            match message {
                QueueMessage::Stop => {
                    self.shutdown();
                    return false;
                }
                QueueMessage::Reinit => self.reinit(),
                QueueMessage::Sync(request) => self.accept(request),
            }
        }

        match self.phase {
            Phase::NoServer => self.phase = Phase::Resolving,
            Phase::Resolving => self.resolve_server(),
            Phase::Active => self.advance(),
            Phase::Stalled => {}
        }

        self.publish();
        true
    }

    /// Blocks only when there is genuinely nothing to drive forward.
    fn pace(&self) {
        match self.phase {
            // The discovery collaborator applies its own timeout; retry at
            // once.
            Phase::NoServer | Phase::Resolving => {}
            Phase::Active => {
                let any_busy = self.slots.iter().any(|s| s.is_busy());
                let any_pending = self.slots.iter().any(|s| s.has_pending());
                if any_busy {
                    std::thread::sleep(self.config.poll_interval);
                } else if !any_pending {
                    self.queue.wait_for_work(self.config.idle_wait);
                }
            }
            Phase::Stalled => self.queue.wait_for_work(self.config.idle_wait),
        }
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Routes a drained request into its slot, applying global dedup: a path
    /// already queued or active anywhere is silently dropped.
    fn accept(&mut self, request: SyncRequest) {
        if !self.in_flight.insert(&request.path) {
            debug!(path = %request.path, "duplicate request dropped");
            return;
        }
        let slot = &mut self.slots[request.category.slot_index()];
        debug!(
            slot = slot.name(),
            category = %request.category,
            path = %request.path,
            "request accepted"
        );
        slot.push(request);
    }

    fn reinit(&mut self) {
        if self.phase != Phase::Stalled {
            debug!("reinit requested while not stalled, ignored");
            return;
        }
        info!("reinitializing after backoff");
        self.stalled_until = None;
        self.consecutive_errors = 0;
        self.server = None;
        self.selector.invalidate();
        self.phase = Phase::NoServer;
    }

    // =========================================================================
    // Server resolution
    // =========================================================================

    fn resolve_server(&mut self) {
        match self.selector.resolve() {
            Ok(server) => {
                info!(server = %server, "mirror server selected");
                self.server = Some(server);
                self.consecutive_errors = 0;
                self.phase = Phase::Active;
            }
            Err(err) => {
                self.consecutive_errors += 1;
                warn!(
                    error = %err,
                    consecutive_errors = self.consecutive_errors,
                    "server resolution failed"
                );
                self.check_stall();
            }
        }
    }

    // =========================================================================
    // Slot advance
    // =========================================================================

    fn advance(&mut self) {
        self.sample_transfer_rate();
        for index in 0..NUM_SLOTS {
            self.advance_slot(index);
        }
        self.check_stall();
    }

    fn advance_slot(&mut self, index: usize) {
        match self.slots[index].poll() {
            SlotPoll::Finished { request, fault } => self.finish(request, fault),
            SlotPoll::Idle | SlotPoll::Running => {}
        }
        if self.slots[index].is_busy() {
            return;
        }
        if let Some(request) = self.slots[index].pop_pending() {
            self.begin(index, request);
        }
    }

    /// Starts the transport operation for `request` on slot `index`.
    ///
    /// A synchronous begin failure is handled identically to an asynchronous
    /// one; an unconfigured optional sub-service fails the request without
    /// counting toward the error threshold.
    fn begin(&mut self, index: usize, mut request: SyncRequest) {
        let remote = match self.remote_base(request.category) {
            Some(remote) => remote,
            None => {
                if !self.warned_unconfigured {
                    warn!(
                        category = %request.category,
                        "optional sub-service not configured, its requests will fail"
                    );
                    self.warned_unconfigured = true;
                }
                request.status = SyncStatus::Failed;
                self.fail_count += 1;
                self.in_flight.remove(&request.path);
                self.completed.push(request);
                return;
            }
        };

        let local = self.config.local_root.join(request.category.subdir());
        match self.factory.begin(&local, &remote, &request.path) {
            Ok(client) => {
                debug!(
                    slot = SLOT_NAMES[index],
                    path = %request.path,
                    url = %remote,
                    "synchronization started"
                );
                self.slots[index].activate(request, client);
            }
            Err(err) => {
                request.status = SyncStatus::Failed;
                self.finish(request, Some(SyncFault::Other(err.to_string())));
            }
        }
    }

    /// Remote base URL for a category: the resolved server plus the
    /// category's sub-path, or the dedicated auxiliary base URL. `None` if
    /// the optional sub-service is not configured.
    fn remote_base(&self, category: SyncCategory) -> Option<String> {
        if category.is_optional() {
            return self
                .config
                .aux_layer_url
                .clone()
                .filter(|url| !url.is_empty());
        }
        self.server
            .as_ref()
            .map(|s| format!("{}/{}", s.trim_end_matches('/'), category.subdir()))
    }

    /// Books a terminal request: counters, in-flight removal, completion
    /// publish.
    fn finish(&mut self, request: SyncRequest, fault: Option<SyncFault>) {
        match &fault {
            None => {
                self.success_count += 1;
                self.consecutive_errors = 0;
                self.backoff_ceiling = Duration::ZERO;
                if request.category == SyncCategory::Terrain {
                    self.updated_tile_count += 1;
                }
                info!(path = %request.path, category = %request.category, "synchronized");
            }
            Some(SyncFault::NotFound) => {
                // Expected for most of the world; not an error.
                debug!(path = %request.path, "remote directory not found");
            }
            Some(SyncFault::Other(reason)) => {
                self.fail_count += 1;
                self.consecutive_errors += 1;
                warn!(
                    path = %request.path,
                    reason = %reason,
                    consecutive_errors = self.consecutive_errors,
                    "synchronization failed"
                );
            }
        }
        self.in_flight.remove(&request.path);
        self.completed.push(request);
    }

    // =========================================================================
    // Stall / backoff
    // =========================================================================

    fn check_stall(&mut self) {
        if self.phase != Phase::Stalled && self.consecutive_errors >= self.config.error_threshold {
            self.enter_stalled();
        }
    }

    fn enter_stalled(&mut self) {
        self.backoff_ceiling = (self.backoff_ceiling + self.config.backoff_increment)
            .min(self.config.backoff_cap);
        let ceiling_secs = self.backoff_ceiling.as_secs();
        let wait = Duration::from_secs(self.rng.random_range(0..=ceiling_secs));
        self.stalled_until = Some(Instant::now() + wait);

        // In-flight operations are abandoned but their requests, like all
        // queued ones, stay in the slots and resume after reinit.
        for slot in &mut self.slots {
            slot.abandon_active();
        }

        warn!(
            consecutive_errors = self.consecutive_errors,
            backoff_ceiling_secs = ceiling_secs,
            wait_secs = wait.as_secs(),
            "too many consecutive errors, synchronization stalled"
        );
        self.phase = Phase::Stalled;
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    fn sample_transfer_rate(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample);
        if elapsed < RATE_SAMPLE_INTERVAL {
            return;
        }
        let total = self.factory.total_bytes_downloaded();
        let delta = total.saturating_sub(self.last_sample_bytes);
        self.transfer_rate = (delta as f64 / elapsed.as_secs_f64()) as u64;
        self.last_sample = now;
        self.last_sample_bytes = total;
    }

    fn publish(&self) {
        self.shared.publish(SchedulerState {
            running: true,
            stalled: self.phase == Phase::Stalled,
            has_server: self.server.is_some(),
            busy: self.slots.iter().filter(|s| s.is_busy()).count() as u32,
            consecutive_errors: self.consecutive_errors,
            success_count: self.success_count,
            fail_count: self.fail_count,
            updated_tile_count: self.updated_tile_count,
            transfer_rate_bytes_sec: self.transfer_rate,
            total_bytes_downloaded: self.factory.total_bytes_downloaded(),
            total_pending_bytes: self.slots.iter().map(|s| s.pending_bytes()).sum(),
            total_pending_extract_bytes: self
                .slots
                .iter()
                .map(|s| s.pending_extract_bytes())
                .sum(),
            stalled_until: self.stalled_until,
        });
    }

    /// Explicit stop: abandon in-flight operations, discard queued work.
    fn shutdown(&mut self) {
        let mut discarded = 0;
        for slot in &mut self.slots {
            discarded += slot.reset();
        }
        self.queue.clear();
        self.in_flight.clear();
        self.shared.publish(SchedulerState::default());
        if discarded > 0 {
            info!(discarded, "discarded queued work on stop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticMirrors;
    use crate::error::{DiscoveryError, TransportError};
    use crate::request::{SLOT_SHARED, SLOT_TILES};
    use crate::transport::SyncClient;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};

    // -------------------------------------------------------------------------
    // Mock collaborators
    // -------------------------------------------------------------------------

    struct MockClient {
        steps: u32,
        fault: Option<SyncFault>,
        bytes: u64,
        url: String,
    }

    impl SyncClient for MockClient {
        fn update(&mut self) {
            self.steps = self.steps.saturating_sub(1);
        }

        fn is_active(&self) -> bool {
            self.steps > 0
        }

        fn failure(&self) -> Option<SyncFault> {
            self.fault.clone()
        }

        fn bytes_to_download(&self) -> u64 {
            if self.is_active() {
                self.bytes
            } else {
                0
            }
        }

        fn bytes_to_extract(&self) -> u64 {
            0
        }

        fn base_url(&self) -> &str {
            &self.url
        }
    }

    /// Scripted outcome of one transport operation.
    #[derive(Clone)]
    enum Outcome {
        Succeed { steps: u32, bytes: u64 },
        NotFound,
        Fail(&'static str),
    }

    struct MockFactory {
        script: Mutex<VecDeque<Outcome>>,
        default: Outcome,
        begun: Mutex<Vec<String>>,
        fail_begin: bool,
        total_bytes: AtomicU64,
    }

    impl MockFactory {
        fn with_default(default: Outcome) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                default,
                begun: Mutex::new(Vec::new()),
                fail_begin: false,
                total_bytes: AtomicU64::new(0),
            })
        }

        fn scripted(outcomes: Vec<Outcome>, default: Outcome) -> Arc<Self> {
            let factory = Self::with_default(default);
            *factory.script.lock() = outcomes.into();
            factory
        }

        fn begin_failing() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                default: Outcome::NotFound,
                begun: Mutex::new(Vec::new()),
                fail_begin: true,
                total_bytes: AtomicU64::new(0),
            })
        }

        fn begun(&self) -> Vec<String> {
            self.begun.lock().clone()
        }
    }

    impl SyncClientFactory for MockFactory {
        fn begin(
            &self,
            _local_dir: &Path,
            remote_base: &str,
            path_filter: &str,
        ) -> Result<Box<dyn SyncClient>, TransportError> {
            if self.fail_begin {
                return Err(TransportError::BeginFailed {
                    url: remote_base.to_string(),
                    reason: "no route to host".into(),
                });
            }
            self.begun.lock().push(path_filter.to_string());
            let outcome = self.script.lock().pop_front().unwrap_or(self.default.clone());
            let (steps, fault, bytes) = match outcome {
                Outcome::Succeed { steps, bytes } => (steps, None, bytes),
                Outcome::NotFound => (1, Some(SyncFault::NotFound), 0),
                Outcome::Fail(reason) => (1, Some(SyncFault::Other(reason.into())), 0),
            };
            if fault.is_none() {
                self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Ok(Box::new(MockClient {
                steps,
                fault,
                bytes,
                url: remote_base.to_string(),
            }))
        }

        fn total_bytes_downloaded(&self) -> u64 {
            self.total_bytes.load(Ordering::Relaxed)
        }
    }

    struct FailingLookup;

    impl MirrorLookup for FailingLookup {
        fn lookup(&self, service: &str) -> Result<Vec<crate::discovery::MirrorCandidate>, DiscoveryError> {
            Err(DiscoveryError::Timeout {
                service: service.to_string(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Harness
    // -------------------------------------------------------------------------

    struct Harness {
        scheduler: Scheduler,
        queue: Arc<RequestQueue>,
        completed: Arc<CompletedQueue>,
        in_flight: Arc<InFlightSet>,
        shared: Arc<SharedState>,
    }

    impl Harness {
        fn new(factory: Arc<MockFactory>, lookup: Option<Arc<dyn MirrorLookup>>) -> Self {
            Self::with_config(test_config(), factory, lookup)
        }

        fn with_config(
            config: SyncConfig,
            factory: Arc<MockFactory>,
            lookup: Option<Arc<dyn MirrorLookup>>,
        ) -> Self {
            let queue = Arc::new(RequestQueue::new());
            let completed = Arc::new(CompletedQueue::new(config.completed_capacity));
            let in_flight = Arc::new(InFlightSet::new());
            let shared = Arc::new(SharedState::new());
            let scheduler = Scheduler::new(
                config,
                factory,
                lookup,
                Arc::clone(&queue),
                Arc::clone(&completed),
                Arc::clone(&in_flight),
                Arc::clone(&shared),
            );
            Self {
                scheduler,
                queue,
                completed,
                in_flight,
                shared,
            }
        }

        fn submit(&self, path: &str, category: SyncCategory) {
            self.queue.submit(SyncRequest::new(path, category));
        }

        fn step(&mut self) -> bool {
            self.scheduler.step()
        }

        fn step_n(&mut self, n: usize) {
            for _ in 0..n {
                assert!(self.step());
            }
        }

        fn step_until<F: Fn(&Harness) -> bool>(&mut self, cond: F) {
            for _ in 0..200 {
                if cond(self) {
                    return;
                }
                assert!(self.step());
            }
            panic!("condition not reached within 200 iterations");
        }
    }

    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::new("/tmp/skysync-test");
        config.rng_seed = Some(1);
        config
    }

    fn mirrors() -> Option<Arc<dyn MirrorLookup>> {
        Some(Arc::new(StaticMirrors::single(
            "https://mirror.example.org",
        )))
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_drain_dedups_and_routes_fifo() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 1, bytes: 0 });
        let mut h = Harness::new(Arc::clone(&factory), mirrors());

        h.submit("A/1/1", SyncCategory::Terrain);
        h.submit("B/2/2", SyncCategory::Terrain);
        h.submit("A/1/1", SyncCategory::Terrain); // duplicate

        // First iteration drains the queue but has no server yet.
        h.step_n(1);
        assert_eq!(
            h.scheduler.slots[SLOT_TILES].pending_paths(),
            vec!["A/1/1", "B/2/2"]
        );
        assert!(h.in_flight.contains("A/1/1"));
        assert!(h.queue.is_empty());

        // Resolution, then strictly FIFO starts within the slot.
        h.step_until(|h| h.completed.len() == 2);
        assert_eq!(factory.begun(), vec!["A/1/1".to_string(), "B/2/2".to_string()]);
    }

    #[test]
    fn test_categories_route_to_their_slots() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 5, bytes: 0 });
        let mut h = Harness::new(factory, mirrors());

        h.submit("e000n40/e005n47", SyncCategory::Terrain);
        h.submit("Airports", SyncCategory::Airports);
        h.submit("Models", SyncCategory::Models);
        h.step_n(1);

        assert_eq!(h.scheduler.slots[SLOT_TILES].pending_len(), 1);
        assert_eq!(h.scheduler.slots[SLOT_SHARED].pending_len(), 2);
    }

    #[test]
    fn test_resolution_succeeds_and_publishes_has_server() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut h = Harness::new(factory, mirrors());

        h.step_until(|h| h.shared.snapshot().has_server);
        assert_eq!(h.scheduler.phase, Phase::Active);
        assert_eq!(h.scheduler.consecutive_errors, 0);
    }

    #[test]
    fn test_resolution_failures_count_and_stall() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut config = test_config();
        config.error_threshold = 3;
        let mut h = Harness::with_config(config, factory, Some(Arc::new(FailingLookup)));

        h.step_until(|h| h.shared.snapshot().stalled);
        let snap = h.shared.snapshot();
        assert!(!snap.has_server);
        assert_eq!(snap.consecutive_errors, 3);
        assert!(snap.stalled_until.is_some());
    }

    #[test]
    fn test_discovery_outage_stalls_even_with_fallback_configured() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut config = test_config();
        config.error_threshold = 3;
        config.fallback_server = Some("https://static.example.org".into());
        let mut h = Harness::with_config(config, factory, Some(Arc::new(FailingLookup)));

        h.step_until(|h| h.shared.snapshot().stalled);
        let snap = h.shared.snapshot();
        assert!(!snap.has_server);
        assert_eq!(snap.consecutive_errors, 3);
    }

    #[test]
    fn test_five_transport_failures_stall_and_retain_unstarted_work() {
        let factory = MockFactory::with_default(Outcome::Fail("connection reset"));
        let mut h = Harness::new(Arc::clone(&factory), mirrors());

        for i in 0..7 {
            h.submit(&format!("t/{i}"), SyncCategory::Terrain);
        }

        h.step_until(|h| h.shared.snapshot().stalled);

        let snap = h.shared.snapshot();
        assert_eq!(snap.consecutive_errors, 5);
        assert_eq!(snap.fail_count, 5);
        assert_eq!(snap.busy, 0);

        // Nothing un-started is discarded on stall: the abandoned active
        // request and the never-started one are still pending.
        assert_eq!(h.scheduler.slots[SLOT_TILES].pending_paths(), vec!["t/5", "t/6"]);
        assert!(h.in_flight.contains("t/5"));
        assert!(h.in_flight.contains("t/6"));

        // The five terminal failures were published.
        let done = h.completed.drain();
        assert_eq!(done.len(), 5);
        assert!(done.iter().all(|r| r.status == SyncStatus::Failed));
    }

    #[test]
    fn test_not_found_never_induces_backoff() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut h = Harness::new(factory, mirrors());

        for i in 0..10 {
            h.submit(&format!("t/{i}"), SyncCategory::Terrain);
        }
        h.step_until(|h| h.completed.len() == 10);

        let snap = h.shared.snapshot();
        assert!(!snap.stalled);
        assert_eq!(snap.consecutive_errors, 0);
        assert_eq!(snap.fail_count, 0);
        assert_eq!(snap.success_count, 0);
        assert!(h
            .completed
            .drain()
            .iter()
            .all(|r| r.status == SyncStatus::NotFound));
    }

    #[test]
    fn test_success_publishes_counters_and_clears_pending_bytes() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 2, bytes: 4096 });
        let mut h = Harness::new(factory, mirrors());

        h.submit("X/3/3", SyncCategory::Terrain);
        h.step_until(|h| h.shared.snapshot().busy == 1);

        // One more iteration leaves the client mid-flight with its byte
        // counter visible.
        h.step_until(|h| h.shared.snapshot().total_pending_bytes == 4096);

        h.step_until(|h| h.completed.len() == 1);
        let snap = h.shared.snapshot();
        assert_eq!(snap.total_pending_bytes, 0);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.updated_tile_count, 1);
        assert_eq!(h.completed.drain()[0].status, SyncStatus::Updated);
        assert!(!h.in_flight.contains("X/3/3"));
    }

    #[test]
    fn test_success_resets_consecutive_errors() {
        let factory = MockFactory::scripted(
            vec![
                Outcome::Fail("reset"),
                Outcome::Fail("reset"),
                Outcome::Succeed { steps: 1, bytes: 0 },
                Outcome::Fail("reset"),
            ],
            Outcome::NotFound,
        );
        let mut h = Harness::new(factory, mirrors());

        for i in 0..4 {
            h.submit(&format!("t/{i}"), SyncCategory::Terrain);
        }
        h.step_until(|h| h.completed.len() == 4);

        let snap = h.shared.snapshot();
        assert!(!snap.stalled);
        assert_eq!(snap.consecutive_errors, 1);
        assert_eq!(snap.fail_count, 3);
        assert_eq!(snap.success_count, 1);
        assert_eq!(h.scheduler.backoff_ceiling, Duration::ZERO);
    }

    #[test]
    fn test_backoff_ceiling_grows_monotonically_and_is_bounded() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut h = Harness::new(factory, mirrors());

        let mut previous = Duration::ZERO;
        for episode in 1..=20u32 {
            h.scheduler.phase = Phase::Active;
            h.scheduler.enter_stalled();
            let expected = Duration::from_secs((60 * u64::from(episode)).min(900));
            assert_eq!(h.scheduler.backoff_ceiling, expected);
            assert!(h.scheduler.backoff_ceiling >= previous);
            previous = h.scheduler.backoff_ceiling;

            let wake = h.scheduler.stalled_until.expect("wake timestamp recorded");
            assert!(wake <= Instant::now() + h.scheduler.backoff_ceiling);
        }
    }

    #[test]
    fn test_reinit_after_stall_resumes_retained_work() {
        let factory = MockFactory::scripted(
            vec![
                Outcome::Fail("reset"),
                Outcome::Fail("reset"),
                Outcome::Fail("reset"),
            ],
            Outcome::Succeed { steps: 1, bytes: 0 },
        );
        let mut config = test_config();
        config.error_threshold = 3;
        let mut h = Harness::with_config(config, Arc::clone(&factory), mirrors());

        for i in 0..5 {
            h.submit(&format!("t/{i}"), SyncCategory::Terrain);
        }
        h.step_until(|h| h.shared.snapshot().stalled);
        assert!(h.scheduler.slots[SLOT_TILES].has_pending());

        h.queue.push_control(QueueMessage::Reinit);
        h.step_until(|h| h.completed.len() == 5);

        let snap = h.shared.snapshot();
        assert!(!snap.stalled);
        assert!(snap.has_server);
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.fail_count, 3);
    }

    #[test]
    fn test_reinit_is_ignored_when_not_stalled() {
        let factory = MockFactory::with_default(Outcome::NotFound);
        let mut h = Harness::new(factory, mirrors());
        h.step_until(|h| h.shared.snapshot().has_server);

        h.queue.push_control(QueueMessage::Reinit);
        h.step_n(1);
        assert_eq!(h.scheduler.phase, Phase::Active);
        assert!(h.shared.snapshot().has_server);
    }

    #[test]
    fn test_stop_discards_everything() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 50, bytes: 1 });
        let mut h = Harness::new(factory, mirrors());

        h.submit("t/0", SyncCategory::Terrain);
        h.submit("t/1", SyncCategory::Terrain);
        h.step_until(|h| h.shared.snapshot().busy == 1);

        h.queue.push_control(QueueMessage::Stop);
        assert!(!h.step());

        assert!(h.in_flight.is_empty());
        assert!(h.queue.is_empty());
        let snap = h.shared.snapshot();
        assert!(!snap.running);
        assert!(!h.scheduler.slots[SLOT_TILES].is_busy());
        assert!(!h.scheduler.slots[SLOT_TILES].has_pending());
    }

    #[test]
    fn test_unconfigured_aux_layer_fails_without_error_accounting() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 1, bytes: 0 });
        let mut h = Harness::new(Arc::clone(&factory), mirrors());

        h.submit("osm/e000n40", SyncCategory::AuxMapLayer);
        h.step_until(|h| h.completed.len() == 1);

        let done = h.completed.drain();
        assert_eq!(done[0].status, SyncStatus::Failed);
        let snap = h.shared.snapshot();
        assert_eq!(snap.consecutive_errors, 0);
        assert_eq!(snap.fail_count, 1);
        assert!(!snap.stalled);
        // No transport operation was ever begun for it.
        assert!(factory.begun().is_empty());
    }

    #[test]
    fn test_configured_aux_layer_uses_its_own_base_url() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 1, bytes: 0 });
        let mut config = test_config();
        config.aux_layer_url = Some("https://layers.example.org".into());
        let mut h = Harness::with_config(config, Arc::clone(&factory), mirrors());

        h.submit("osm/e000n40", SyncCategory::AuxMapLayer);
        h.step_until(|h| h.completed.len() == 1);

        assert_eq!(h.completed.drain()[0].status, SyncStatus::Updated);
        assert_eq!(factory.begun(), vec!["osm/e000n40".to_string()]);
    }

    #[test]
    fn test_synchronous_begin_failure_counts_as_error() {
        let factory = MockFactory::begin_failing();
        let mut h = Harness::new(factory, mirrors());

        h.submit("t/0", SyncCategory::Terrain);
        h.step_until(|h| h.completed.len() == 1);

        let snap = h.shared.snapshot();
        assert_eq!(snap.consecutive_errors, 1);
        assert_eq!(snap.fail_count, 1);
        assert_eq!(h.completed.drain()[0].status, SyncStatus::Failed);
    }

    #[test]
    fn test_duplicate_of_active_path_is_dropped_until_terminal() {
        let factory = MockFactory::with_default(Outcome::Succeed { steps: 3, bytes: 0 });
        let mut h = Harness::new(Arc::clone(&factory), mirrors());

        h.submit("A/1/1", SyncCategory::Terrain);
        h.step_until(|h| h.shared.snapshot().busy == 1);

        // Resubmission while active is dropped.
        h.submit("A/1/1", SyncCategory::Terrain);
        h.step_n(1);
        assert_eq!(h.scheduler.slots[SLOT_TILES].pending_len(), 0);
        assert_eq!(factory.begun().len(), 1);

        // After the terminal status, the same path may sync again.
        h.step_until(|h| h.completed.len() == 1);
        h.submit("A/1/1", SyncCategory::Terrain);
        h.step_until(|h| h.completed.len() == 2);
        assert_eq!(factory.begun().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_backoff_ceiling_is_min_60k_900(episodes in 1u64..40) {
            let factory = MockFactory::with_default(Outcome::NotFound);
            let mut h = Harness::new(factory, mirrors());
            for _ in 0..episodes {
                h.scheduler.phase = Phase::Active;
                h.scheduler.enter_stalled();
            }
            prop_assert_eq!(
                h.scheduler.backoff_ceiling,
                Duration::from_secs((60 * episodes).min(900))
            );
        }
    }
}
