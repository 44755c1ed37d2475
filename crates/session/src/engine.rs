//! Contract for the external spatial mapping engine.

use crate::EngineError;
use async_trait::async_trait;
use spatial_model::{Marker, MarkerId, Transform, WorldMap};
use tokio::sync::broadcast;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitedReason {
    Initializing,
    ExcessiveMotion,
    InsufficientFeatures,
    Relocalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingQuality {
    NotAvailable,
    Limited(LimitedReason),
    Normal,
}

impl TrackingQuality {
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::NotAvailable => "Tracking unavailable",
            Self::Limited(LimitedReason::Initializing) => "Initializing, move the device slowly",
            Self::Limited(LimitedReason::ExcessiveMotion) => "Moving too fast, slow down",
            Self::Limited(LimitedReason::InsufficientFeatures) => {
                "Not enough detail, point at a textured surface"
            }
            Self::Limited(LimitedReason::Relocalizing) => {
                "Relocalizing, look around the mapped area"
            }
            Self::Normal => "Tracking normal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStatus {
    NotAvailable,
    Limited,
    Extending,
    Mapped,
}

impl MappingStatus {
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::NotAvailable => "No map data yet",
            Self::Limited => "Map is sparse, keep scanning",
            Self::Extending => "Extending the map",
            Self::Mapped => "Area mapped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    TrackingChanged {
        quality: TrackingQuality,
        mapping: MappingStatus,
    },
    InterruptionBegan,
    InterruptionEnded,
    /// Unrecoverable failure of the running session; a reset may fix it.
    SessionFailed(String),
}

/// One live mapping session on the device.
///
/// The session controller is the only caller of the mutating methods.
#[async_trait]
pub trait MappingEngine: Send + Sync + 'static {
    /// Restarts tracking. With `initial_map` the engine tries to relocalize
    /// against it instead of starting a fresh map.
    async fn reset_session(&self, initial_map: Option<WorldMap>) -> EngineResult<()>;

    async fn pause(&self);

    /// Adds a marker to the live scene and to the session's map.
    async fn add_point(&self, marker: &Marker);

    async fn remove_point(&self, id: MarkerId);

    /// Pose in front of the device where a new marker would be placed.
    async fn placement_pose(&self) -> Option<Transform>;

    /// Snapshot of the current map. Must keep returning the last session's
    /// map after [`MappingEngine::pause`].
    async fn current_map_snapshot(&self) -> EngineResult<WorldMap>;

    fn events(&self) -> broadcast::Receiver<EngineEvent>;
}
