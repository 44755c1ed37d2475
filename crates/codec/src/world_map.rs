use crate::marker::{marker_from_record, marker_record, MarkerOutcome};
use crate::value::{
    decode_value, encode_value, read_header, write_header, AllowList, BlobKind, Reader, Record,
    Value, MARKER_CLASS, PLANE_CLASS, WORLD_MAP_CLASS,
};
use crate::{CodecError, Result};
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use spatial_model::{AnchorId, AnchorRecord, PlaneAlignment, PlaneAnchor, Transform, WorldMap};

const FIELD_FEATURES: &str = "features";
const FIELD_ANCHORS: &str = "anchors";
const FIELD_IDENTIFIER: &str = "identifier";
const FIELD_TRANSFORM: &str = "transform";
const FIELD_EXTENT: &str = "extent";
const FIELD_ALIGNMENT: &str = "alignment";

/// Planes smaller than this (m²) are dropped during optimization.
pub const MIN_PLANE_AREA: f32 = 0.25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub markers_kept: usize,
    pub planes_kept: usize,
    pub planes_dropped: usize,
    pub others_dropped: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

fn plane_record(plane: &PlaneAnchor) -> Record {
    let alignment = match plane.alignment {
        PlaneAlignment::Horizontal => "horizontal",
        PlaneAlignment::Vertical => "vertical",
    };
    Record::new(PLANE_CLASS)
        .with(FIELD_IDENTIFIER, Value::Identifier(*plane.id.as_uuid()))
        .with(FIELD_TRANSFORM, Value::Transform(plane.transform.to_array()))
        .with(
            FIELD_EXTENT,
            Value::Array(vec![
                Value::Scalar(plane.extent[0]),
                Value::Scalar(plane.extent[1]),
            ]),
        )
        .with(FIELD_ALIGNMENT, Value::Text(alignment.to_string()))
}

fn plane_from_record(record: &Record) -> Option<PlaneAnchor> {
    let Some(Value::Transform(values)) = record.get(FIELD_TRANSFORM) else {
        return None;
    };
    let transform = Transform::from_array(*values);
    transform.validate().ok()?;
    let extent = match record.get(FIELD_EXTENT) {
        Some(Value::Array(items)) => match items.as_slice() {
            [Value::Scalar(w), Value::Scalar(l)] if w.is_finite() && l.is_finite() => [*w, *l],
            _ => return None,
        },
        _ => return None,
    };
    let alignment = match record.get(FIELD_ALIGNMENT) {
        Some(Value::Text(text)) if text == "vertical" => PlaneAlignment::Vertical,
        _ => PlaneAlignment::Horizontal,
    };
    let id = match record.get(FIELD_IDENTIFIER) {
        Some(Value::Identifier(uuid)) => AnchorId::from_uuid(*uuid),
        _ => AnchorId::new(),
    };
    Some(PlaneAnchor {
        id,
        transform,
        extent,
        alignment,
    })
}

fn anchor_value(anchor: &AnchorRecord) -> Value {
    match anchor {
        AnchorRecord::Marker(marker) => Value::Record(marker_record(marker)),
        AnchorRecord::Plane(plane) => Value::Record(plane_record(plane)),
        AnchorRecord::Other { type_name, payload } => Value::Opaque {
            class: type_name.clone(),
            body: Bytes::copy_from_slice(payload),
        },
    }
}

#[must_use]
pub fn encode_world_map(map: &WorldMap) -> Bytes {
    let root = Record::new(WORLD_MAP_CLASS)
        .with(
            FIELD_FEATURES,
            Value::Bytes(Bytes::copy_from_slice(&map.features)),
        )
        .with(
            FIELD_ANCHORS,
            Value::Array(map.anchors.iter().map(anchor_value).collect()),
        );
    let mut out = BytesMut::with_capacity(16 + map.features.len());
    write_header(&mut out, BlobKind::WorldMap);
    encode_value(&mut out, &Value::Record(root));
    out.freeze()
}

/// Strict at the map level: without the feature blob there is no map.
/// Individual anchors that fail to decode are dropped with a warning.
pub fn decode_world_map(blob: Bytes) -> Result<WorldMap> {
    let mut reader = Reader::new(blob);
    read_header(&mut reader, BlobKind::WorldMap)?;
    let root = match decode_value(&mut reader, &AllowList::world_map(), 0, "world map")? {
        Value::Record(record) if record.class == WORLD_MAP_CLASS => record,
        Value::Record(record) => {
            return Err(CodecError::malformed(format!(
                "root record has class {}",
                record.class
            )))
        }
        other => {
            return Err(CodecError::malformed(format!(
                "root has type {}",
                other.tag().name()
            )))
        }
    };

    let features = match root.get(FIELD_FEATURES) {
        Some(Value::Bytes(raw)) => raw.to_vec(),
        _ => return Err(CodecError::malformed("world map has no feature data")),
    };

    let mut anchors = Vec::new();
    match root.get(FIELD_ANCHORS) {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::Record(record) if record.class == MARKER_CLASS => {
                        match marker_from_record(record) {
                            MarkerOutcome::Decoded { marker, .. } => {
                                anchors.push(AnchorRecord::Marker(marker));
                            }
                            MarkerOutcome::Skipped { reason } => {
                                warn!("Dropping marker anchor from world map: {reason}");
                            }
                        }
                    }
                    Value::Record(record) if record.class == PLANE_CLASS => {
                        match plane_from_record(record) {
                            Some(plane) => anchors.push(AnchorRecord::Plane(plane)),
                            None => warn!("Dropping unreadable plane anchor from world map"),
                        }
                    }
                    Value::Opaque { class, body } => anchors.push(AnchorRecord::Other {
                        type_name: class.clone(),
                        payload: body.to_vec(),
                    }),
                    other => warn!(
                        "Ignoring world map anchor entry of type {}",
                        other.tag().name()
                    ),
                }
            }
        }
        None => {}
        Some(other) => warn!("World map anchors have type {}", other.tag().name()),
    }

    Ok(WorldMap { features, anchors })
}

/// Re-encodes the map once and keeps only marker anchors and large planes.
///
/// Lossy: every other anchor type is discarded and cannot be recovered from
/// the saved blob.
pub fn optimize_world_map(map: &WorldMap) -> Result<(WorldMap, OptimizeStats)> {
    let encoded = encode_world_map(map);
    let mut stats = OptimizeStats {
        bytes_before: encoded.len(),
        ..OptimizeStats::default()
    };
    let mut decoded = decode_world_map(encoded)?;

    decoded.anchors.retain(|anchor| match anchor {
        AnchorRecord::Marker(_) => {
            stats.markers_kept += 1;
            true
        }
        AnchorRecord::Plane(plane) if plane.area() >= MIN_PLANE_AREA => {
            stats.planes_kept += 1;
            true
        }
        AnchorRecord::Plane(_) => {
            stats.planes_dropped += 1;
            false
        }
        AnchorRecord::Other { .. } => {
            stats.others_dropped += 1;
            false
        }
    });

    stats.bytes_after = encode_world_map(&decoded).len();
    debug!(
        "Optimized world map: {} markers, {} planes kept; {} planes and {} other anchors dropped ({} -> {} bytes)",
        stats.markers_kept,
        stats.planes_kept,
        stats.planes_dropped,
        stats.others_dropped,
        stats.bytes_before,
        stats.bytes_after
    );
    Ok((decoded, stats))
}
