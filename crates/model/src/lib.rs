//! # Spatial Model
//!
//! Value types shared by every layer of the room persistence stack.
//!
//! ## Types
//!
//! ```text
//! Room ──> Rooms/<name>/worldMap.bin ──> WorldMap
//!   │                                     ├─> opaque feature blob
//!   │                                     └─> AnchorRecord[] (Marker | Plane | Other)
//!   │
//!   └───> Rooms/<name>/anchors.bin   ──> Marker[]
//! ```
//!
//! Markers are immutable once placed: identity, pose, radius and color are
//! fixed at construction and only change by removal and re-creation.

mod anchor;
mod color;
mod error;
mod ids;
mod marker;
mod room;
mod transform;

pub use anchor::{AnchorRecord, PlaneAlignment, PlaneAnchor, WorldMap};
pub use color::{Rgba, PALETTE};
pub use error::{ModelError, Result};
pub use ids::{AnchorId, MarkerId, RoomId};
pub use marker::{sanitize_radius, Marker, DEFAULT_RADIUS, MAX_RADIUS};
pub use room::{Room, MARKER_LIST_FILE_NAME, SPATIAL_MAP_FILE_NAME};
pub use transform::Transform;
