//! Error types shared across the scheduler.

use thiserror::Error;

/// Errors raised by the mirror-discovery collaborator.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery query did not complete within the collaborator's timeout.
    #[error("mirror discovery for '{service}' timed out")]
    Timeout { service: String },

    /// The discovery backend failed outright.
    #[error("mirror discovery for '{service}' failed: {reason}")]
    Backend { service: String, reason: String },
}

/// Errors raised while choosing a mirror server.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Discovery timed out, failed, or returned no candidates; or discovery
    /// is disabled and no static server is configured.
    #[error("no servers found for service '{service}'")]
    NoServersFound {
        service: String,
        #[source]
        source: Option<DiscoveryError>,
    },
}

/// Errors raised when starting a transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not begin reconciling the requested tree.
    #[error("failed to start sync against {url}: {reason}")]
    BeginFailed { url: String, reason: String },
}

/// Errors raised by the facade lifecycle operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start()` was called while a worker is already running.
    #[error("synchronization worker is already running")]
    AlreadyRunning,

    /// The worker thread could not be spawned.
    #[error("failed to spawn synchronization worker: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::NoServersFound {
            service: "terrasync".into(),
            source: None,
        };
        assert_eq!(err.to_string(), "no servers found for service 'terrasync'");
    }

    #[test]
    fn test_resolve_error_carries_discovery_source() {
        use std::error::Error;

        let err = ResolveError::NoServersFound {
            service: "terrasync".into(),
            source: Some(DiscoveryError::Timeout {
                service: "terrasync".into(),
            }),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::BeginFailed {
            url: "https://mirror.example.org/Terrain".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("mirror.example.org"));
        assert!(err.to_string().contains("connection refused"));
    }
}
