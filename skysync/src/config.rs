//! Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default consecutive-error count that stalls the scheduler.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Default bounded wait on the request queue when fully idle.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Default pacing between worker iterations while transports are active.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default elapsed time before a slow sync is first warned about.
///
/// The threshold doubles after each warning for the same operation.
pub const DEFAULT_SLOW_SYNC_WARNING: Duration = Duration::from_secs(30);

/// Default backoff growth per stall episode.
pub const DEFAULT_BACKOFF_INCREMENT: Duration = Duration::from_secs(60);

/// Default backoff ceiling.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(900);

/// Configuration for the synchronization scheduler.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the local content cache. Each category syncs into its own
    /// subdirectory beneath it.
    pub local_root: PathBuf,

    /// Logical service name submitted to mirror discovery (and used for the
    /// environment pinning variable).
    pub service_name: String,

    /// Statically configured server, used only when discovery is disabled.
    pub fallback_server: Option<String>,

    /// Base URL of the optional auxiliary map-layer sub-service. When unset,
    /// auxiliary requests fail without counting toward the error threshold.
    pub aux_layer_url: Option<String>,

    /// Consecutive transient errors that trip the scheduler into the
    /// stalled state.
    pub error_threshold: u32,

    /// Bounded wait on the request queue when the queue is empty and every
    /// slot is idle.
    pub idle_wait: Duration,

    /// Pacing between iterations while any transport operation is active.
    pub poll_interval: Duration,

    /// Initial slow-sync warning threshold; doubles per re-trigger.
    pub slow_sync_warning: Duration,

    /// Backoff ceiling growth per stall episode.
    pub backoff_increment: Duration,

    /// Upper bound on the backoff ceiling.
    pub backoff_cap: Duration,

    /// Capacity of the completion ring.
    pub completed_capacity: usize,

    /// Seed for the scheduler's random source (mirror choice, backoff
    /// jitter). `None` seeds from the OS; tests set it for reproducibility.
    pub rng_seed: Option<u64>,
}

impl SyncConfig {
    /// Configuration with defaults for everything but the cache root.
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            service_name: "terrasync".to_string(),
            fallback_server: None,
            aux_layer_url: None,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            idle_wait: DEFAULT_IDLE_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            slow_sync_warning: DEFAULT_SLOW_SYNC_WARNING,
            backoff_increment: DEFAULT_BACKOFF_INCREMENT,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            completed_capacity: crate::queue::DEFAULT_COMPLETED_CAPACITY,
            rng_seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("/tmp/skysync");
        assert_eq!(config.error_threshold, DEFAULT_ERROR_THRESHOLD);
        assert_eq!(config.backoff_increment, Duration::from_secs(60));
        assert_eq!(config.backoff_cap, Duration::from_secs(900));
        assert!(config.aux_layer_url.is_none());
        assert!(config.rng_seed.is_none());
    }
}
