//! Transport collaborator interface.
//!
//! The actual directory-tree diff and file transfer is performed by an
//! external repository-sync client; this module defines the minimal
//! poll-style surface the scheduler needs from it. The contract is strictly
//! non-blocking: the worker calls [`SyncClient::update`] once per loop
//! iteration and inspects progress, so a slow operation in one slot can never
//! stall the others.
//!
//! Implementations live in the host application (or in tests and the CLI
//! soak harness); this core never parses or validates transferred content.

use crate::error::TransportError;
use std::path::Path;

/// Why an operation stopped, when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFault {
    /// The requested remote directory does not exist.
    ///
    /// A benign, expected outcome: most of the world has no fine-grained
    /// tile data. Never counted as an error.
    NotFound,
    /// Any other transport failure.
    Other(String),
}

/// One in-flight directory reconciliation.
///
/// Constructed per active request by a [`SyncClientFactory`]; dropped to
/// abandon the operation (a late result is discarded).
pub trait SyncClient: Send {
    /// Advances the operation one non-blocking step.
    fn update(&mut self);

    /// True while the operation is still running.
    fn is_active(&self) -> bool;

    /// The failure outcome, once `is_active()` is false. `None` on success.
    fn failure(&self) -> Option<SyncFault>;

    /// Bytes still to be downloaded, for progress reporting.
    fn bytes_to_download(&self) -> u64;

    /// Bytes still to be extracted locally, for progress reporting.
    fn bytes_to_extract(&self) -> u64;

    /// Remote base URL of this operation, for diagnostics.
    fn base_url(&self) -> &str;
}

/// Factory for [`SyncClient`] operations, shared by all slots.
pub trait SyncClientFactory: Send + Sync {
    /// Begins reconciling `remote_base` into `local_dir`, restricted by
    /// `path_filter` to exactly the requested sub-path and never a broader
    /// tree.
    fn begin(
        &self,
        local_dir: &Path,
        remote_base: &str,
        path_filter: &str,
    ) -> Result<Box<dyn SyncClient>, TransportError>;

    /// Cumulative bytes downloaded by the engine over its lifetime.
    ///
    /// Sampled by the scheduler to derive the published transfer rate.
    fn total_bytes_downloaded(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_equality() {
        assert_eq!(SyncFault::NotFound, SyncFault::NotFound);
        assert_ne!(
            SyncFault::NotFound,
            SyncFault::Other("timeout".into())
        );
    }
}
