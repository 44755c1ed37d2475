use spatial_model::RoomId;
use std::fmt;

/// Observable lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording { room: RoomId },
    /// Map loaded, waiting for the engine to relocalize against it.
    Loading { room: RoomId },
    /// Relocalized; loaded markers are in the live scene.
    Viewing { room: RoomId },
}

impl SessionState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording { .. } => "recording",
            Self::Loading { .. } => "loading",
            Self::Viewing { .. } => "viewing",
        }
    }

    #[must_use]
    pub fn room(&self) -> Option<RoomId> {
        match self {
            Self::Idle => None,
            Self::Recording { room } | Self::Loading { room } | Self::Viewing { room } => {
                Some(*room)
            }
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveReason {
    /// Throttled save after a marker was added or removed.
    MarkerChange,
    /// Unconditional save when recording stops.
    Final,
}

/// Everything the controller announces besides its watch feeds.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(String),
    StateChanged(SessionState),
    SaveStarted {
        room: RoomId,
        reason: SaveReason,
    },
    SaveFinished {
        room: RoomId,
        reason: SaveReason,
        error: Option<String>,
    },
    LoadFailed {
        room: RoomId,
        error: String,
    },
    /// Marker list finished loading; `attached` is false while still waiting
    /// for relocalization.
    MarkersLoaded {
        room: RoomId,
        count: usize,
        attached: bool,
    },
    Relocalized {
        room: RoomId,
    },
}

/// Relocalization progress stages.
pub(crate) mod progress {
    pub const MAP_LOADED: f32 = 0.3;
    pub const MARKERS_LOADED: f32 = 0.6;
    pub const TRACKING_LIMITED: f32 = 0.8;
    pub const RELOCALIZED: f32 = 1.0;

    /// Progress after `fraction` of the marker batches.
    pub fn marker_batches(fraction: f32) -> f32 {
        MAP_LOADED + (MARKERS_LOADED - MAP_LOADED) * fraction.clamp(0.0, 1.0)
    }
}
