//! Simulated transport for soak runs.
//!
//! Stands in for a real mirror protocol: each operation takes a randomized
//! amount of wall-clock time and finishes with an outcome drawn from the
//! configured failure and not-found rates. Lets the scheduler be exercised
//! end to end, stalls and backoff included, without any network.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skysync::{SyncClient, SyncClientFactory, SyncFault, TransportError};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Probability in [0, 1] that an operation fails.
    pub fail_rate: f64,
    /// Probability in [0, 1] that the remote directory does not exist.
    pub not_found_rate: f64,
    /// Mean operation latency; actual latency is uniform in [0.5x, 1.5x].
    pub latency: Duration,
    pub seed: Option<u64>,
}

pub struct SimFactory {
    options: SimOptions,
    rng: Mutex<StdRng>,
    total_bytes: Arc<AtomicU64>,
}

impl SimFactory {
    pub fn new(options: SimOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            options,
            rng: Mutex::new(rng),
            total_bytes: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl SyncClientFactory for SimFactory {
    fn begin(
        &self,
        _local_dir: &Path,
        remote_base: &str,
        _path_filter: &str,
    ) -> Result<Box<dyn SyncClient>, TransportError> {
        let mut rng = self.rng.lock();
        let draw: f64 = rng.random();
        let fault = if draw < self.options.fail_rate {
            Some(SyncFault::Other("simulated connection reset".into()))
        } else if draw < self.options.fail_rate + self.options.not_found_rate {
            Some(SyncFault::NotFound)
        } else {
            None
        };
        let bytes = if fault.is_none() {
            rng.random_range(16 * 1024..4 * 1024 * 1024)
        } else {
            0
        };
        let latency_ms = self.options.latency.as_millis() as u64;
        let jittered = rng.random_range(latency_ms / 2..=latency_ms + latency_ms / 2);

        Ok(Box::new(SimClient {
            finish_at: Instant::now() + Duration::from_millis(jittered),
            done: false,
            fault,
            bytes,
            url: remote_base.to_string(),
            total_bytes: Arc::clone(&self.total_bytes),
        }))
    }

    fn total_bytes_downloaded(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

struct SimClient {
    finish_at: Instant,
    done: bool,
    fault: Option<SyncFault>,
    bytes: u64,
    url: String,
    total_bytes: Arc<AtomicU64>,
}

impl SyncClient for SimClient {
    fn update(&mut self) {
        if !self.done && Instant::now() >= self.finish_at {
            self.done = true;
            if self.fault.is_none() {
                self.total_bytes.fetch_add(self.bytes, Ordering::Relaxed);
            }
        }
    }

    fn is_active(&self) -> bool {
        !self.done
    }

    fn failure(&self) -> Option<SyncFault> {
        if self.done {
            self.fault.clone()
        } else {
            None
        }
    }

    fn bytes_to_download(&self) -> u64 {
        if self.done {
            0
        } else {
            self.bytes
        }
    }

    fn bytes_to_extract(&self) -> u64 {
        0
    }

    fn base_url(&self) -> &str {
        &self.url
    }
}
