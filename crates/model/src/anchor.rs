use crate::{AnchorId, Marker, Transform};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneAlignment {
    Horizontal,
    Vertical,
}

/// A detected planar surface (floor, table, wall).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaneAnchor {
    pub id: AnchorId,
    pub transform: Transform,
    /// Width/length of the plane in meters.
    pub extent: [f32; 2],
    pub alignment: PlaneAlignment,
}

impl PlaneAnchor {
    #[must_use]
    pub fn area(&self) -> f32 {
        self.extent[0].max(0.0) * self.extent[1].max(0.0)
    }
}

/// Anchor as it appears inside a persisted world map.
///
/// Only `Marker` and `Plane` survive optimization; `Other` stands for every
/// engine-specific anchor type the store does not understand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorRecord {
    Marker(Marker),
    Plane(PlaneAnchor),
    Other {
        type_name: String,
        #[serde(skip)]
        payload: Vec<u8>,
    },
}

impl AnchorRecord {
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Marker(_) => "marker",
            Self::Plane(_) => "plane",
            Self::Other { type_name, .. } => type_name,
        }
    }
}

/// Engine snapshot of a mapped space: opaque feature data plus the anchors
/// embedded in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldMap {
    pub features: Vec<u8>,
    pub anchors: Vec<AnchorRecord>,
}

impl WorldMap {
    #[must_use]
    pub fn new(features: Vec<u8>) -> Self {
        Self {
            features,
            anchors: Vec::new(),
        }
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.anchors.iter().filter_map(|a| match a {
            AnchorRecord::Marker(m) => Some(m),
            _ => None,
        })
    }

    pub fn planes(&self) -> impl Iterator<Item = &PlaneAnchor> {
        self.anchors.iter().filter_map(|a| match a {
            AnchorRecord::Plane(p) => Some(p),
            _ => None,
        })
    }
}
