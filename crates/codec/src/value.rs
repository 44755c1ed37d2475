//! Self-describing tagged value format shared by both blob kinds.
//!
//! ```text
//! blob    := magic "SPRM" | version u16 | kind u8 | value
//! value   := tag u8 | payload
//! record  := class (u16 len + utf8) | body_len u32 | body
//! body    := field_count u16 | field*
//! field   := name (u16 len + utf8) | value_len u32 | value
//! ```
//!
//! Every record body and every field value is length-prefixed, so a decoder
//! can skip a record class it refuses and can reject a single field without
//! losing its position in the stream. All integers and floats are
//! little-endian.

use crate::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

pub const MAGIC: &[u8; 4] = b"SPRM";
pub const FORMAT_VERSION: u16 = 1;

pub const MARKER_CLASS: &str = "SphereAnchor";
pub const PLANE_CLASS: &str = "PlaneAnchor";
pub const WORLD_MAP_CLASS: &str = "WorldMap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueTag {
    Scalar = 0x01,
    Text = 0x02,
    Transform = 0x03,
    Color = 0x04,
    Identifier = 0x05,
    Bytes = 0x06,
    Array = 0x07,
    Record = 0x08,
}

impl ValueTag {
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0x01 => Self::Scalar,
            0x02 => Self::Text,
            0x03 => Self::Transform,
            0x04 => Self::Color,
            0x05 => Self::Identifier,
            0x06 => Self::Bytes,
            0x07 => Self::Array,
            0x08 => Self::Record,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Text => "text",
            Self::Transform => "transform",
            Self::Color => "color",
            Self::Identifier => "identifier",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Record => "record",
        }
    }
}

/// Artifact stored in a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlobKind {
    MarkerList = 1,
    WorldMap = 2,
}

impl BlobKind {
    const fn name(self) -> &'static str {
        match self {
            Self::MarkerList => "marker list",
            Self::WorldMap => "world map",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f32),
    Text(String),
    Transform([f32; 16]),
    Color([f32; 4]),
    Identifier(Uuid),
    Bytes(Bytes),
    Array(Vec<Value>),
    Record(Record),
    /// Record of a class the allow-list tolerates but does not interpret.
    Opaque { class: String, body: Bytes },
}

impl Value {
    #[must_use]
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Scalar(_) => ValueTag::Scalar,
            Self::Text(_) => ValueTag::Text,
            Self::Transform(_) => ValueTag::Transform,
            Self::Color(_) => ValueTag::Color,
            Self::Identifier(_) => ValueTag::Identifier,
            Self::Bytes(_) => ValueTag::Bytes,
            Self::Array(_) => ValueTag::Array,
            Self::Record(_) | Self::Opaque { .. } => ValueTag::Record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub class: String,
    pub fields: Vec<(String, Value)>,
    /// Fields present on disk but refused by the decoder, with the reason.
    pub rejected: Vec<(String, String)>,
    /// Set when the field framing broke part-way through the body.
    pub damaged: bool,
}

impl Record {
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Value types and record classes a decoder is willing to materialize.
#[derive(Debug, Clone)]
pub struct AllowList {
    tags: Vec<ValueTag>,
    classes: Vec<&'static str>,
    opaque_records: bool,
    max_depth: usize,
}

impl AllowList {
    /// Transforms, scalars, strings, colors, identifiers, the marker class and
    /// arrays thereof. Nothing else.
    #[must_use]
    pub fn marker_list() -> Self {
        Self {
            tags: vec![
                ValueTag::Scalar,
                ValueTag::Text,
                ValueTag::Transform,
                ValueTag::Color,
                ValueTag::Identifier,
                ValueTag::Array,
                ValueTag::Record,
            ],
            classes: vec![MARKER_CLASS],
            opaque_records: false,
            max_depth: 4,
        }
    }

    /// Adds the opaque feature blob and plane anchors. Engine-specific anchor
    /// classes are kept as opaque bytes, never interpreted.
    #[must_use]
    pub fn world_map() -> Self {
        let mut allow = Self::marker_list();
        allow.tags.push(ValueTag::Bytes);
        allow.classes.extend([PLANE_CLASS, WORLD_MAP_CLASS]);
        allow.opaque_records = true;
        allow.max_depth = 6;
        allow
    }

    #[must_use]
    pub fn permits_tag(&self, tag: ValueTag) -> bool {
        self.tags.contains(&tag)
    }

    #[must_use]
    pub fn permits_class(&self, class: &str) -> bool {
        self.classes.iter().any(|allowed| *allowed == class)
    }
}

pub(crate) struct Reader {
    buf: Bytes,
}

impl Reader {
    pub(crate) fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, needed: usize) -> Result<()> {
        let available = self.buf.remaining();
        if available < needed {
            return Err(CodecError::Truncated { needed, available });
        }
        Ok(())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<Bytes> {
        self.need(len)?;
        Ok(self.buf.split_to(len))
    }

    fn short_text(&mut self) -> Result<String> {
        let len = usize::from(self.u16()?);
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn floats<const N: usize>(&mut self) -> Result<[f32; N]> {
        self.need(N * 4)?;
        let mut out = [0.0; N];
        for slot in &mut out {
            *slot = self.buf.get_f32_le();
        }
        Ok(out)
    }
}

pub(crate) fn write_header(out: &mut BytesMut, kind: BlobKind) {
    out.put_slice(MAGIC);
    out.put_u16_le(FORMAT_VERSION);
    out.put_u8(kind as u8);
}

pub(crate) fn read_header(reader: &mut Reader, expected: BlobKind) -> Result<()> {
    let magic = reader.take(MAGIC.len()).map_err(|_| CodecError::BadMagic)?;
    if magic.as_ref() != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = reader.u16()?;
    if version == 0 || version > FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let kind = reader.u8()?;
    if kind != expected as u8 {
        return Err(CodecError::WrongKind {
            expected: expected.name(),
            found: kind,
        });
    }
    Ok(())
}

fn put_short_text(out: &mut BytesMut, text: &str) {
    let raw = text.as_bytes();
    let len = raw.len().min(usize::from(u16::MAX));
    out.put_u16_le(len as u16);
    out.put_slice(&raw[..len]);
}

fn put_len(out: &mut BytesMut, len: usize) {
    out.put_u32_le(u32::try_from(len).unwrap_or(u32::MAX));
}

pub fn encode_value(out: &mut BytesMut, value: &Value) {
    out.put_u8(value.tag() as u8);
    match value {
        Value::Scalar(v) => out.put_f32_le(*v),
        Value::Text(text) => {
            put_len(out, text.len());
            out.put_slice(text.as_bytes());
        }
        Value::Transform(values) => values.iter().for_each(|v| out.put_f32_le(*v)),
        Value::Color(values) => values.iter().for_each(|v| out.put_f32_le(*v)),
        Value::Identifier(uuid) => out.put_slice(uuid.as_bytes()),
        Value::Bytes(raw) => {
            put_len(out, raw.len());
            out.put_slice(raw);
        }
        Value::Array(items) => {
            put_len(out, items.len());
            for item in items {
                encode_value(out, item);
            }
        }
        Value::Record(record) => {
            put_short_text(out, &record.class);
            let mut body = BytesMut::new();
            let count = record.fields.len().min(usize::from(u16::MAX));
            body.put_u16_le(count as u16);
            for (name, field) in record.fields.iter().take(count) {
                put_short_text(&mut body, name);
                let mut encoded = BytesMut::new();
                encode_value(&mut encoded, field);
                put_len(&mut body, encoded.len());
                body.put_slice(&encoded);
            }
            put_len(out, body.len());
            out.put_slice(&body);
        }
        Value::Opaque { class, body } => {
            put_short_text(out, class);
            put_len(out, body.len());
            out.put_slice(body);
        }
    }
}

pub(crate) fn decode_value(
    reader: &mut Reader,
    allow: &AllowList,
    depth: usize,
    context: &'static str,
) -> Result<Value> {
    if depth > allow.max_depth {
        return Err(CodecError::TooDeep(allow.max_depth));
    }
    let raw_tag = reader.u8()?;
    let tag = ValueTag::from_u8(raw_tag).ok_or(CodecError::UnknownTag(raw_tag))?;
    if !allow.permits_tag(tag) {
        return Err(CodecError::DisallowedType {
            kind: tag.name().to_string(),
            context,
        });
    }

    Ok(match tag {
        ValueTag::Scalar => Value::Scalar(reader.f32()?),
        ValueTag::Text => {
            let len = reader.u32()? as usize;
            let raw = reader.take(len)?;
            Value::Text(String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?)
        }
        ValueTag::Transform => Value::Transform(reader.floats::<16>()?),
        ValueTag::Color => Value::Color(reader.floats::<4>()?),
        ValueTag::Identifier => {
            let raw = reader.take(16)?;
            Value::Identifier(
                Uuid::from_slice(&raw).map_err(|err| CodecError::malformed(err.to_string()))?,
            )
        }
        ValueTag::Bytes => {
            let len = reader.u32()? as usize;
            Value::Bytes(reader.take(len)?)
        }
        ValueTag::Array => {
            let count = reader.u32()? as usize;
            // Every element needs at least its tag byte.
            if count > reader.remaining() {
                return Err(CodecError::Truncated {
                    needed: count,
                    available: reader.remaining(),
                });
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value(reader, allow, depth + 1, context)?);
            }
            Value::Array(items)
        }
        ValueTag::Record => {
            let class = reader.short_text()?;
            let len = reader.u32()? as usize;
            let body = reader.take(len)?;
            if allow.permits_class(&class) {
                Value::Record(decode_record_body(class, body, allow, depth + 1))
            } else if allow.opaque_records {
                Value::Opaque { class, body }
            } else {
                return Err(CodecError::DisallowedType {
                    kind: format!("record class {class}"),
                    context,
                });
            }
        }
    })
}

/// Field-level failures are recorded on the record instead of propagated.
fn decode_record_body(class: String, body: Bytes, allow: &AllowList, depth: usize) -> Record {
    let mut record = Record::new(class);
    let mut reader = Reader::new(body);

    let count = match reader.u16() {
        Ok(count) => count,
        Err(_) => {
            record.damaged = true;
            return record;
        }
    };

    for _ in 0..count {
        let framed = reader.short_text().and_then(|name| {
            let len = reader.u32()? as usize;
            Ok((name, reader.take(len)?))
        });
        let Ok((name, raw)) = framed else {
            record.damaged = true;
            break;
        };

        let mut field_reader = Reader::new(raw);
        match decode_value(&mut field_reader, allow, depth, "record field") {
            Ok(_) if field_reader.remaining() > 0 => {
                record
                    .rejected
                    .push((name, "trailing bytes after value".to_string()));
            }
            Ok(value) => record.fields.push((name, value)),
            Err(err) => record.rejected.push((name, err.to_string())),
        }
    }
    record
}
