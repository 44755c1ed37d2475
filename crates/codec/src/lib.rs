//! # Spatial Codec
//!
//! Binary encoding for the two per-room artifacts.
//!
//! ## Artifacts
//!
//! ```text
//! anchors.bin  ── header ── Array<SphereAnchor>
//!                              └─> identifier, transform, radius, color
//!
//! worldMap.bin ── header ── WorldMap
//!                              ├─> features (opaque engine bytes)
//!                              └─> anchors: SphereAnchor | PlaneAnchor | <opaque>
//! ```
//!
//! ## Decoding policy
//!
//! - Decoders accept only the value types and record classes on an explicit
//!   [`AllowList`]; anything else is refused before it is materialized.
//! - Marker records decode field by field: a missing or wrong-typed field
//!   falls back to a default instead of failing the list.
//! - World maps are all-or-nothing at the map level.

mod error;
mod marker;
mod value;
mod world_map;

pub use error::{CodecError, Result};
pub use marker::{
    decode_marker_list, encode_marker_list, DecodeReport, MarkerListDecoder, MarkerOutcome,
};
pub use value::{
    encode_value, AllowList, BlobKind, Record, Value, ValueTag, FORMAT_VERSION, MAGIC,
    MARKER_CLASS, PLANE_CLASS, WORLD_MAP_CLASS,
};
pub use world_map::{
    decode_world_map, encode_world_map, optimize_world_map, OptimizeStats, MIN_PLANE_AREA,
};
