//! Mirror discovery collaborator interface.
//!
//! Resolving a logical service name (e.g. `terrasync`) to candidate mirror
//! servers is delegated to an external DNS-based discovery client. The
//! collaborator applies its own query timeout; an empty candidate set or a
//! timeout both surface as a resolution failure to the scheduler.

use crate::error::DiscoveryError;

/// One discovered mirror, annotated with selection metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorCandidate {
    /// Base URL of the mirror.
    pub server: String,
    /// Preference tier; lower is better. Only the lowest tier is considered.
    pub order: u32,
    /// Weight for random selection within a tier.
    pub preference: u32,
}

impl MirrorCandidate {
    /// Creates a candidate.
    pub fn new(server: impl Into<String>, order: u32, preference: u32) -> Self {
        Self {
            server: server.into(),
            order,
            preference,
        }
    }
}

/// Discovery collaborator: resolves a service name to candidate mirrors.
pub trait MirrorLookup: Send + Sync {
    /// Queries candidates for `service`, with a timeout applied internally.
    fn lookup(&self, service: &str) -> Result<Vec<MirrorCandidate>, DiscoveryError>;
}

/// A fixed candidate list.
///
/// Used by the CLI soak harness and by tests; also convenient for
/// deployments that pin their mirrors in configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMirrors {
    candidates: Vec<MirrorCandidate>,
}

impl StaticMirrors {
    /// Creates a static list from the given candidates.
    pub fn new(candidates: Vec<MirrorCandidate>) -> Self {
        Self { candidates }
    }

    /// Convenience: a single mirror at order 0, preference 1.
    pub fn single(server: impl Into<String>) -> Self {
        Self::new(vec![MirrorCandidate::new(server, 0, 1)])
    }
}

impl MirrorLookup for StaticMirrors {
    fn lookup(&self, _service: &str) -> Result<Vec<MirrorCandidate>, DiscoveryError> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_mirrors_returns_configured_candidates() {
        let mirrors = StaticMirrors::new(vec![
            MirrorCandidate::new("https://a.example.org", 0, 1),
            MirrorCandidate::new("https://b.example.org", 1, 5),
        ]);
        let found = mirrors.lookup("terrasync").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].server, "https://a.example.org");
    }

    #[test]
    fn test_static_single() {
        let mirrors = StaticMirrors::single("https://a.example.org");
        let found = mirrors.lookup("anything").unwrap();
        assert_eq!(found, vec![MirrorCandidate::new("https://a.example.org", 0, 1)]);
    }
}
