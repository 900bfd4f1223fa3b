//! Synchronization request model and category routing.
//!
//! A [`SyncRequest`] names one unit of remote content to keep current: a
//! relative directory path (a terrain tile like `e000n40/e005n47`, or a fixed
//! dataset name like `Airports`) plus the [`SyncCategory`] it belongs to.
//!
//! Categories route to synchronization slots through a fixed table rather
//! than scattered conditionals: several categories share a slot to bound the
//! number of concurrent transport operations, and each category maps to a
//! sub-path of the remote service.

use std::fmt;

// =============================================================================
// Slot routing
// =============================================================================

/// Slot for terrain and imagery tiles.
pub const SLOT_TILES: usize = 0;

/// Slot for shared datasets (airports, shared models).
pub const SLOT_SHARED: usize = 1;

/// Slot for AI traffic data.
pub const SLOT_AI: usize = 2;

/// Slot for auxiliary map layers (optional sub-service).
pub const SLOT_AUX: usize = 3;

/// Number of synchronization slots.
pub const NUM_SLOTS: usize = 4;

/// Human-readable slot names, indexed by slot number.
pub const SLOT_NAMES: [&str; NUM_SLOTS] = ["tiles", "shared", "ai", "aux"];

// =============================================================================
// Category
// =============================================================================

/// The kind of content a request refers to.
///
/// The category determines which slot serializes the request and which remote
/// sub-service the transport is pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCategory {
    /// Terrain and imagery tiles.
    Terrain,
    /// Airport datasets.
    Airports,
    /// Shared model library.
    Models,
    /// AI traffic data.
    AiTraffic,
    /// Auxiliary map layers served by an optional, separately configured
    /// sub-service.
    AuxMapLayer,
}

impl SyncCategory {
    /// All categories, in routing-table order.
    pub const ALL: [SyncCategory; 5] = [
        SyncCategory::Terrain,
        SyncCategory::Airports,
        SyncCategory::Models,
        SyncCategory::AiTraffic,
        SyncCategory::AuxMapLayer,
    ];

    /// Index of the slot that serializes this category.
    pub fn slot_index(self) -> usize {
        match self {
            SyncCategory::Terrain => SLOT_TILES,
            SyncCategory::Airports | SyncCategory::Models => SLOT_SHARED,
            SyncCategory::AiTraffic => SLOT_AI,
            SyncCategory::AuxMapLayer => SLOT_AUX,
        }
    }

    /// Sub-path of the remote service (and of the local cache root) holding
    /// this category's tree.
    pub fn subdir(self) -> &'static str {
        match self {
            SyncCategory::Terrain => "Terrain",
            SyncCategory::Airports => "Airports",
            SyncCategory::Models => "Models",
            SyncCategory::AiTraffic => "AI",
            SyncCategory::AuxMapLayer => "MapLayers",
        }
    }

    /// Whether this category is served by an optional sub-service that a
    /// deployment may leave unconfigured.
    pub fn is_optional(self) -> bool {
        matches!(self, SyncCategory::AuxMapLayer)
    }
}

impl fmt::Display for SyncCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncCategory::Terrain => "Terrain",
            SyncCategory::Airports => "Airports",
            SyncCategory::Models => "Models",
            SyncCategory::AiTraffic => "AiTraffic",
            SyncCategory::AuxMapLayer => "AuxMapLayer",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a request.
///
/// Only the scheduler worker mutates this; a request is terminal once the
/// status has moved away from [`SyncStatus::Waiting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Queued or in flight.
    #[default]
    Waiting,
    /// Synchronized successfully.
    Updated,
    /// The remote directory does not exist. Benign for most of the world.
    NotFound,
    /// The transport failed, or the sub-service is unconfigured.
    Failed,
}

impl SyncStatus {
    /// True once the request will never change again.
    pub fn is_terminal(self) -> bool {
        self != SyncStatus::Waiting
    }
}

// =============================================================================
// Request
// =============================================================================

/// One unit of synchronization work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Relative directory identifying the unit of synchronization.
    pub path: String,
    /// Routing category.
    pub category: SyncCategory,
    /// Outcome, mutated only by the scheduler worker.
    pub status: SyncStatus,
}

impl SyncRequest {
    /// Creates a new waiting request.
    pub fn new(path: impl Into<String>, category: SyncCategory) -> Self {
        Self {
            path: path.into(),
            category,
            status: SyncStatus::Waiting,
        }
    }
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.path)
    }
}
