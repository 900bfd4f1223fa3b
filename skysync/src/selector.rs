//! Mirror server selection policy.
//!
//! Resolution order:
//!
//! 1. An operator override via the `SKYSYNC_SERVER_<SERVICE>` environment
//!    variable pins a server outright (testing, debugging, captive setups).
//! 2. When discovery is wired in, candidates are filtered to the subset
//!    sharing the lowest `order`, and one is drawn at random with probability
//!    proportional to `preference`. Every resolution takes a fresh draw, so
//!    repeated resolutions over a long session (e.g. after an outage)
//!    load-balance across mirrors instead of pinning to one forever.
//! 3. Without discovery, a statically configured server is used.
//!
//! Selection state is owned by the instance rather than a process-wide
//! cache, so independent schedulers can coexist in tests.

use crate::discovery::{MirrorCandidate, MirrorLookup};
use crate::error::{DiscoveryError, ResolveError};
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Environment variable prefix for per-service server pinning.
pub const ENV_SERVER_PREFIX: &str = "SKYSYNC_SERVER_";

/// The outcome of the most recent resolution.
#[derive(Debug, Clone)]
pub struct ServerSelection {
    /// The chosen mirror base URL.
    pub server: String,
    /// When the choice was made.
    pub resolved_at: Instant,
}

/// Resolves and caches the currently chosen mirror for one logical service.
pub struct ServerSelector<R: Rng> {
    service: String,
    lookup: Option<Arc<dyn MirrorLookup>>,
    fallback: Option<String>,
    current: Option<ServerSelection>,
    rng: R,
}

impl<R: Rng> ServerSelector<R> {
    /// Creates a selector for `service`.
    ///
    /// `lookup` is the discovery collaborator (`None` disables discovery);
    /// `fallback` is the statically configured server used only when
    /// discovery is disabled.
    pub fn new(
        service: impl Into<String>,
        lookup: Option<Arc<dyn MirrorLookup>>,
        fallback: Option<String>,
        rng: R,
    ) -> Self {
        Self {
            service: service.into(),
            lookup,
            fallback,
            current: None,
            rng,
        }
    }

    /// The most recent selection, if any.
    pub fn current(&self) -> Option<&ServerSelection> {
        self.current.as_ref()
    }

    /// Forgets the current selection so the next `resolve` picks afresh.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Chooses a server, recording and returning the selection.
    pub fn resolve(&mut self) -> Result<String, ResolveError> {
        let server = self.choose()?;
        self.current = Some(ServerSelection {
            server: server.clone(),
            resolved_at: Instant::now(),
        });
        Ok(server)
    }

    fn choose(&mut self) -> Result<String, ResolveError> {
        if let Some(pinned) = self.env_override() {
            info!(service = %self.service, server = %pinned, "server pinned via environment");
            return Ok(pinned);
        }

        let Some(lookup) = self.lookup.as_ref() else {
            debug!(service = %self.service, "discovery disabled, using configured server");
            return self.fallback().ok_or_else(|| ResolveError::NoServersFound {
                service: self.service.clone(),
                source: None,
            });
        };

        // With discovery enabled, a timeout or an empty candidate set is a
        // resolution failure; the static server is a substitute for
        // discovery, not a safety net behind it.
        match lookup.lookup(&self.service) {
            Ok(candidates) if candidates.is_empty() => {
                warn!(service = %self.service, "discovery returned no candidates");
                Err(ResolveError::NoServersFound {
                    service: self.service.clone(),
                    source: None,
                })
            }
            Ok(candidates) => {
                let chosen = pick_weighted(&candidates, &mut self.rng);
                debug!(
                    service = %self.service,
                    candidates = candidates.len(),
                    server = %chosen,
                    "selected mirror"
                );
                Ok(chosen)
            }
            Err(err) => {
                warn!(service = %self.service, error = %err, "mirror discovery failed");
                Err(self.no_servers(err))
            }
        }
    }

    fn fallback(&self) -> Option<String> {
        self.fallback.clone().filter(|s| !s.is_empty())
    }

    fn no_servers(&self, source: DiscoveryError) -> ResolveError {
        ResolveError::NoServersFound {
            service: self.service.clone(),
            source: Some(source),
        }
    }

    fn env_override(&self) -> Option<String> {
        let var = env_var_name(&self.service);
        std::env::var(var).ok().filter(|v| !v.is_empty())
    }
}

/// Environment variable name pinning the server for `service`.
pub fn env_var_name(service: &str) -> String {
    let suffix: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_SERVER_PREFIX}{suffix}")
}

/// Weighted random pick among the candidates sharing the lowest `order`.
///
/// Candidates with zero `preference` get weight 1 so they remain selectable
/// (and so an all-zero tier degenerates to a uniform pick).
fn pick_weighted<R: Rng>(candidates: &[MirrorCandidate], rng: &mut R) -> String {
    let best_order = candidates
        .iter()
        .map(|c| c.order)
        .min()
        .unwrap_or_default();
    let tier: Vec<&MirrorCandidate> =
        candidates.iter().filter(|c| c.order == best_order).collect();

    let total: u64 = tier.iter().map(|c| weight(c)).sum();
    let mut draw = rng.random_range(0..total);
    for candidate in &tier {
        let w = weight(candidate);
        if draw < w {
            return candidate.server.clone();
        }
        draw -= w;
    }
    // Unreachable: draw < total and the weights sum to total.
    tier[tier.len() - 1].server.clone()
}

fn weight(candidate: &MirrorCandidate) -> u64 {
    u64::from(candidate.preference).max(1)
}
