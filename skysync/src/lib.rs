//! Background scenery synchronization for flight simulators.
//!
//! SkySync keeps a local scenery tree up to date against remote mirror
//! servers while the simulator is running. The host application owns a
//! [`SyncService`], enqueues [`SyncRequest`]s as the aircraft moves, and
//! drives the service once per frame; a single background worker thread
//! performs the actual synchronization through a pluggable transport.
//!
//! # Architecture
//!
//! ```text
//!  host threads                     worker thread
//!  ────────────                     ─────────────
//!  SyncService::request_sync ──► RequestQueue ──► per-category slots
//!  SyncService::update        ◄── CompletedQueue ◄── transport clients
//!  SyncService::state         ◄── SharedState snapshot
//! ```
//!
//! Requests are grouped into four slots (terrain tiles, shared scenery
//! models, AI traffic data, auxiliary map layers); each slot runs at most
//! one transport operation at a time, so categories progress independently
//! and a large terrain download never starves airport data. A path is
//! globally deduplicated from acceptance until it reaches a terminal status.
//!
//! Repeated transient failures stall the worker, which backs off with a
//! randomized, growing delay (up to 15 minutes) and resumes with its queued
//! work intact once the facade reinitializes it.
//!
//! # Example
//!
//! ```no_run
//! use skysync::{SyncCategory, SyncConfig, SyncService};
//! # use skysync::{MirrorLookup, SyncClientFactory};
//! # fn transport() -> std::sync::Arc<dyn SyncClientFactory> { unimplemented!() }
//! # fn discovery() -> std::sync::Arc<dyn MirrorLookup> { unimplemented!() }
//!
//! let mut config = SyncConfig::new("/var/lib/skysync/scenery");
//! config.fallback_server = Some("https://scenery.example.org".into());
//!
//! let mut service = SyncService::new(config, transport(), Some(discovery()));
//! service.start()?;
//!
//! service.request_sync("e000n40/e005n47", SyncCategory::Terrain);
//!
//! // Once per frame:
//! for finished in service.update() {
//!     println!("{finished}");
//! }
//!
//! service.stop();
//! # Ok::<(), skysync::ServiceError>(())
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod queue;
pub mod request;
pub mod selector;
pub mod service;
pub mod state;
pub mod transport;

mod scheduler;
mod slot;

pub use config::SyncConfig;
pub use discovery::{MirrorCandidate, MirrorLookup, StaticMirrors};
pub use error::{DiscoveryError, ResolveError, ServiceError, TransportError};
pub use request::{SyncCategory, SyncRequest, SyncStatus};
pub use selector::{ServerSelection, ServerSelector};
pub use service::SyncService;
pub use state::SchedulerState;
pub use transport::{SyncClient, SyncClientFactory, SyncFault};
