use crate::value::{
    decode_value, encode_value, read_header, write_header, AllowList, BlobKind, Reader, Record,
    Value, ValueTag, MARKER_CLASS,
};
use crate::{CodecError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use log::warn;
use spatial_model::{sanitize_radius, Marker, MarkerId, Rgba, Transform, DEFAULT_RADIUS};

pub(crate) const FIELD_IDENTIFIER: &str = "identifier";
pub(crate) const FIELD_TRANSFORM: &str = "transform";
pub(crate) const FIELD_RADIUS: &str = "radius";
pub(crate) const FIELD_COLOR: &str = "color";

/// What happened to one stored marker record.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOutcome {
    Decoded {
        marker: Marker,
        /// Fields that were missing, wrong-typed or out of range and got a default.
        defaulted: Vec<&'static str>,
    },
    Skipped {
        reason: String,
    },
}

/// Aggregate diagnostics for a decoded marker list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub decoded: usize,
    pub defaulted_fields: usize,
    pub skipped: Vec<String>,
}

impl DecodeReport {
    pub fn absorb(&mut self, outcome: &MarkerOutcome) {
        match outcome {
            MarkerOutcome::Decoded { defaulted, .. } => {
                self.decoded += 1;
                self.defaulted_fields += defaulted.len();
            }
            MarkerOutcome::Skipped { reason } => self.skipped.push(reason.clone()),
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.defaulted_fields == 0 && self.skipped.is_empty()
    }
}

pub(crate) fn marker_record(marker: &Marker) -> Record {
    Record::new(MARKER_CLASS)
        .with(FIELD_IDENTIFIER, Value::Identifier(*marker.id().as_uuid()))
        .with(FIELD_TRANSFORM, Value::Transform(marker.transform().to_array()))
        .with(FIELD_RADIUS, Value::Scalar(marker.radius()))
        .with(FIELD_COLOR, Value::Color(marker.color().to_array()))
}

/// Tolerant decode: every field is independently optional. Only a record
/// without a usable pose is skipped, since there is nowhere to put it.
pub(crate) fn marker_from_record(record: &Record) -> MarkerOutcome {
    let transform = match record.get(FIELD_TRANSFORM) {
        Some(Value::Transform(values)) => Transform::from_array(*values),
        Some(other) => {
            return MarkerOutcome::Skipped {
                reason: format!("transform has type {}", other.tag().name()),
            }
        }
        None => {
            return MarkerOutcome::Skipped {
                reason: "transform missing".to_string(),
            }
        }
    };

    let mut defaulted = Vec::new();

    let id = match record.get(FIELD_IDENTIFIER) {
        Some(Value::Identifier(uuid)) => MarkerId::from_uuid(*uuid),
        _ => {
            defaulted.push(FIELD_IDENTIFIER);
            MarkerId::new()
        }
    };

    let radius = match record.get(FIELD_RADIUS) {
        Some(Value::Scalar(radius)) if sanitize_radius(*radius) == *radius => *radius,
        _ => {
            defaulted.push(FIELD_RADIUS);
            DEFAULT_RADIUS
        }
    };

    let color = match record.get(FIELD_COLOR) {
        Some(Value::Color([r, g, b, a])) => Rgba::new(*r, *g, *b, *a),
        _ => {
            defaulted.push(FIELD_COLOR);
            Rgba::OPAQUE_RED
        }
    };

    match Marker::restore(id, transform, radius, color) {
        Ok(marker) => MarkerOutcome::Decoded { marker, defaulted },
        Err(err) => MarkerOutcome::Skipped {
            reason: err.to_string(),
        },
    }
}

/// Encodes a marker list blob: header plus an array of marker records.
#[must_use]
pub fn encode_marker_list(markers: &[Marker]) -> Bytes {
    let mut out = BytesMut::with_capacity(16 + markers.len() * 128);
    write_header(&mut out, BlobKind::MarkerList);
    out.put_u8(ValueTag::Array as u8);
    out.put_u32_le(u32::try_from(markers.len()).unwrap_or(u32::MAX));
    for marker in markers {
        encode_value(&mut out, &Value::Record(marker_record(marker)));
    }
    out.freeze()
}

/// Incremental marker list decoder, consumed in bounded batches.
///
/// Header and element count are validated up front; each call to
/// [`MarkerListDecoder::next_batch`] decodes at most `max` records.
pub struct MarkerListDecoder {
    reader: Reader,
    allow: AllowList,
    total: usize,
    consumed: usize,
}

impl MarkerListDecoder {
    pub fn new(blob: Bytes) -> Result<Self> {
        let mut reader = Reader::new(blob);
        read_header(&mut reader, BlobKind::MarkerList)?;
        let raw_tag = reader.u8()?;
        if raw_tag != ValueTag::Array as u8 {
            return Err(CodecError::malformed(format!(
                "marker list root must be an array, found tag 0x{raw_tag:02x}"
            )));
        }
        let total = reader.u32()? as usize;
        if total > reader.remaining() {
            return Err(CodecError::Truncated {
                needed: total,
                available: reader.remaining(),
            });
        }
        Ok(Self {
            reader,
            allow: AllowList::marker_list(),
            total,
            consumed: 0,
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.consumed >= self.total
    }

    /// Decodes up to `max` records. A broken element frame is fatal for the
    /// rest of the list because the stream position is lost.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<MarkerOutcome>> {
        let take = max.max(1).min(self.total - self.consumed);
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let value = decode_value(&mut self.reader, &self.allow, 1, "marker list")?;
            self.consumed += 1;
            let outcome = match value {
                Value::Record(record) => marker_from_record(&record),
                other => MarkerOutcome::Skipped {
                    reason: format!("element has type {}", other.tag().name()),
                },
            };
            if let MarkerOutcome::Skipped { reason } = &outcome {
                warn!("Skipping stored marker #{}: {reason}", self.consumed);
            }
            out.push(outcome);
        }
        if self.is_finished() && self.reader.remaining() > 0 {
            warn!(
                "Marker list has {} trailing bytes after {} records",
                self.reader.remaining(),
                self.total
            );
        }
        Ok(out)
    }
}

/// One-shot decode of a whole marker list.
pub fn decode_marker_list(blob: Bytes) -> Result<(Vec<Marker>, DecodeReport)> {
    let mut decoder = MarkerListDecoder::new(blob)?;
    let mut markers = Vec::with_capacity(decoder.total());
    let mut report = DecodeReport::default();
    while !decoder.is_finished() {
        for outcome in decoder.next_batch(usize::MAX)? {
            report.absorb(&outcome);
            if let MarkerOutcome::Decoded { marker, .. } = outcome {
                markers.push(marker);
            }
        }
    }
    Ok((markers, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(records: Vec<Value>) -> Bytes {
        let mut out = BytesMut::new();
        write_header(&mut out, BlobKind::MarkerList);
        encode_value(&mut out, &Value::Array(records));
        out.freeze()
    }

    fn marker(x: f32, radius: f32, color: Rgba) -> Marker {
        Marker::new(Transform::from_translation(x, 0.0, -1.0), radius, color).unwrap()
    }

    #[test]
    fn fields_survive_round_trip_within_tolerance() {
        let original = marker(0.5, 0.05, Rgba::new(0.1, 0.2, 0.3, 0.9));
        let (decoded, report) = decode_marker_list(encode_marker_list(&[original.clone()])).unwrap();
        assert!(report.is_clean());
        let back = &decoded[0];
        assert_eq!(back.id(), original.id());
        assert!((back.radius() - 0.05).abs() <= 0.001);
        assert!(back.color().approx_eq(&original.color()));
        assert!(back.transform().approx_eq(original.transform(), 1e-6));
    }

    #[test]
    fn out_of_range_radius_decodes_to_default() {
        for stored in [0.0_f32, -1.0, 1.5, f32::INFINITY] {
            let record = marker_record(&marker(0.0, 0.5, Rgba::OPAQUE_RED));
            let mut fields = record.fields.clone();
            fields[2].1 = Value::Scalar(stored);
            let record = Record { fields, ..record };
            let (decoded, report) = decode_marker_list(list_of(vec![Value::Record(record)])).unwrap();
            assert_eq!(decoded[0].radius(), DEFAULT_RADIUS, "stored {stored}");
            assert_eq!(report.defaulted_fields, 1);
        }
    }

    #[test]
    fn missing_color_defaults_to_opaque_red_and_keeps_neighbours() {
        let blue = Rgba::new(0.0, 0.0, 1.0, 1.0);
        let keep_a = marker(1.0, 0.1, blue);
        let keep_b = marker(2.0, 0.2, blue);
        let damaged = marker(3.0, 0.3, blue);
        let mut damaged_record = marker_record(&damaged);
        damaged_record.fields.retain(|(name, _)| name != FIELD_COLOR);

        let blob = list_of(vec![
            Value::Record(marker_record(&keep_a)),
            Value::Record(damaged_record),
            Value::Record(marker_record(&keep_b)),
        ]);
        let (decoded, report) = decode_marker_list(blob).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].id(), damaged.id());
        assert_eq!(decoded[1].color(), Rgba::OPAQUE_RED);
        assert!((decoded[1].radius() - 0.3).abs() < 1e-6);
        assert_eq!(decoded[0].color(), blue);
        assert_eq!(decoded[2].color(), blue);
        assert_eq!(report.defaulted_fields, 1);
    }

    #[test]
    fn wrong_typed_fields_fall_back_independently() {
        let record = Record::new(MARKER_CLASS)
            .with(FIELD_IDENTIFIER, Value::Text("abc".into()))
            .with(FIELD_TRANSFORM, Value::Transform(Transform::IDENTITY.to_array()))
            .with(FIELD_RADIUS, Value::Text("big".into()))
            .with(FIELD_COLOR, Value::Scalar(0.5));
        let outcome = marker_from_record(&record);
        let MarkerOutcome::Decoded { marker, defaulted } = outcome else {
            panic!("expected decoded marker");
        };
        assert_eq!(defaulted, vec![FIELD_IDENTIFIER, FIELD_RADIUS, FIELD_COLOR]);
        assert_eq!(marker.radius(), DEFAULT_RADIUS);
        assert_eq!(marker.color(), Rgba::OPAQUE_RED);
    }

    #[test]
    fn record_without_pose_is_skipped_not_fatal() {
        let good = marker(1.0, 0.1, Rgba::OPAQUE_RED);
        let no_pose = Record::new(MARKER_CLASS).with(FIELD_RADIUS, Value::Scalar(0.1));
        let blob = list_of(vec![Value::Record(no_pose), Value::Record(marker_record(&good))]);
        let (decoded, report) = decode_marker_list(blob).unwrap();
        assert_eq!(decoded, vec![good]);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn batches_are_bounded() {
        let markers: Vec<Marker> = (0..120)
            .map(|i| marker(i as f32 * 0.01, 0.05, Rgba::OPAQUE_RED))
            .collect();
        let mut decoder = MarkerListDecoder::new(encode_marker_list(&markers)).unwrap();
        assert_eq!(decoder.total(), 120);
        let sizes: Vec<usize> = std::iter::from_fn(|| {
            (!decoder.is_finished()).then(|| decoder.next_batch(50).unwrap().len())
        })
        .collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[test]
    fn foreign_class_in_list_fails_the_blob() {
        let blob = list_of(vec![Value::Record(Record::new("Script"))]);
        let err = decode_marker_list(blob).unwrap_err();
        assert!(matches!(err, CodecError::DisallowedType { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            decode_marker_list(Bytes::from_static(b"not a blob")).unwrap_err(),
            CodecError::BadMagic
        );
        assert!(decode_marker_list(Bytes::new()).is_err());
    }
}
