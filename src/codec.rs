//! Typed-value codec for INFO fields.
//!
//! Values are stored as BCF2 typed values: a descriptor byte holding the
//! element count in the high nibble and a storage tag in the low nibble,
//! followed by little-endian elements. Counts of 15 or more spill into a
//! typed integer after the descriptor.
//!
//! Each integer width reserves its minimum as "missing" and minimum + 1 as
//! "end of vector". Floats reserve two NaN bit patterns for the same roles;
//! they are always compared as bits.
//!
//! The wire bytes alone cannot tell a flag from an empty string, or a scalar
//! from a one-element vector, so decoding takes the field's definition.

use crate::record::FieldValue;
use crate::schema::{FieldDefinition, ValueKind};
use crate::{Error, Result};
use std::fmt::Write;

/// In-memory marker for a missing integer vector element.
pub const MISSING_INT: i64 = i32::MIN as i64;

pub const MISSING_FLOAT_BITS: u32 = 0x7F80_0001;
pub const END_OF_VECTOR_FLOAT_BITS: u32 = 0x7F80_0002;

/// In-memory marker for a missing float vector element.
pub const MISSING_FLOAT: f32 = f32::from_bits(MISSING_FLOAT_BITS);

/// Storage tag of a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Missing = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Float = 5,
    Char = 7,
}

impl Tag {
    pub fn width(self) -> usize {
        match self {
            Tag::Missing => 0,
            Tag::Int8 | Tag::Char => 1,
            Tag::Int16 => 2,
            Tag::Int32 | Tag::Float => 4,
        }
    }

    fn is_int(self) -> bool {
        matches!(self, Tag::Int8 | Tag::Int16 | Tag::Int32)
    }

    /// Smallest value that is neither sentinel.
    fn min_value(self) -> i64 {
        match self {
            Tag::Int8 => i64::from(i8::MIN) + 2,
            Tag::Int16 => i64::from(i16::MIN) + 2,
            _ => i64::from(i32::MIN) + 2,
        }
    }

    fn max_value(self) -> i64 {
        match self {
            Tag::Int8 => i64::from(i8::MAX),
            Tag::Int16 => i64::from(i16::MAX),
            _ => i64::from(i32::MAX),
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            0 => Ok(Tag::Missing),
            1 => Ok(Tag::Int8),
            2 => Ok(Tag::Int16),
            3 => Ok(Tag::Int32),
            5 => Ok(Tag::Float),
            7 => Ok(Tag::Char),
            _ => Err(Error::Decode(format!("invalid type tag: {}", n))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot<T> {
    Value(T),
    Missing,
    EndOfVector,
}

/// A borrowed view of one typed value.
#[derive(Debug, Clone, Copy)]
pub struct TypedValue<'a> {
    pub tag: Tag,
    pub count: usize,
    payload: &'a [u8],
}

impl<'a> TypedValue<'a> {
    /// Reads one typed value from the front of `src`, returning the rest.
    pub fn read(src: &'a [u8]) -> Result<(Self, &'a [u8])> {
        let (&descriptor, mut rest) = src
            .split_first()
            .ok_or_else(|| Error::Decode("empty typed value".to_string()))?;

        let tag = Tag::try_from(descriptor & 0x0F)?;
        let mut count = usize::from(descriptor >> 4);

        if count == 15 {
            let (length, after) = TypedValue::read(rest)?;
            count = match (length.tag.is_int(), length.int_slots().next()) {
                (true, Some(Slot::Value(n))) if n >= 15 => n as usize,
                _ => return Err(Error::Decode("invalid overflow length".to_string())),
            };
            rest = after;
        }

        let len = count
            .checked_mul(tag.width())
            .filter(|&len| len <= rest.len())
            .ok_or_else(|| {
                Error::Decode(format!(
                    "typed value needs {} elements of {} bytes, {} bytes left",
                    count,
                    tag.width(),
                    rest.len()
                ))
            })?;

        let (payload, rest) = rest.split_at(len);
        Ok((Self { tag, count, payload }, rest))
    }

    fn int_slots(&self) -> impl Iterator<Item = Slot<i64>> + '_ {
        let tag = self.tag;
        self.payload.chunks_exact(tag.width().max(1)).map(move |b| {
            let (value, missing) = match tag {
                Tag::Int8 => (i64::from(b[0] as i8), i64::from(i8::MIN)),
                Tag::Int16 => (
                    i64::from(i16::from_le_bytes([b[0], b[1]])),
                    i64::from(i16::MIN),
                ),
                _ => (
                    i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                    i64::from(i32::MIN),
                ),
            };
            if value == missing {
                Slot::Missing
            } else if value == missing + 1 {
                Slot::EndOfVector
            } else {
                Slot::Value(value)
            }
        })
    }

    fn float_slots(&self) -> impl Iterator<Item = Slot<f32>> + '_ {
        self.payload.chunks_exact(4).map(|b| {
            let bits = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            match bits {
                MISSING_FLOAT_BITS => Slot::Missing,
                END_OF_VECTOR_FLOAT_BITS => Slot::EndOfVector,
                _ => Slot::Value(f32::from_bits(bits)),
            }
        })
    }

    fn text(&self) -> Result<&'a str> {
        let end = self
            .payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        std::str::from_utf8(&self.payload[..end])
            .map_err(|e| Error::Decode(format!("invalid string value: {}", e)))
    }
}

/// Decodes a stored value using its declared kind and arity.
pub fn decode(src: &[u8], definition: &FieldDefinition) -> Result<FieldValue> {
    let (value, _) = TypedValue::read(src)?;

    if definition.kind == ValueKind::Flag {
        return Ok(FieldValue::Flag(true));
    }

    let scalar = definition.number.is_scalar();

    match value.tag {
        Tag::Missing => Ok(FieldValue::Missing),
        Tag::Char => {
            let text = value.text()?;
            if scalar {
                Ok(FieldValue::Str(text.to_string()))
            } else if text.is_empty() {
                Ok(FieldValue::StrVec(Vec::new()))
            } else {
                Ok(FieldValue::StrVec(
                    text.split(',').map(str::to_string).collect(),
                ))
            }
        }
        Tag::Float => {
            if scalar {
                return Ok(match value.float_slots().next() {
                    Some(Slot::Value(v)) => FieldValue::Float(f64::from(v)),
                    _ => FieldValue::Missing,
                });
            }
            let mut values = Vec::with_capacity(value.count);
            for (i, slot) in value.float_slots().enumerate() {
                match slot {
                    Slot::EndOfVector => break,
                    Slot::Missing if i == 0 => return Ok(FieldValue::Missing),
                    Slot::Missing => values.push(MISSING_FLOAT),
                    Slot::Value(v) => values.push(v),
                }
            }
            Ok(FieldValue::FloatVec(values))
        }
        Tag::Int8 | Tag::Int16 | Tag::Int32 => {
            if scalar {
                return Ok(match value.int_slots().next() {
                    Some(Slot::Value(v)) => FieldValue::Int(v),
                    _ => FieldValue::Missing,
                });
            }
            let mut values = Vec::with_capacity(value.count);
            for (i, slot) in value.int_slots().enumerate() {
                match slot {
                    Slot::EndOfVector => break,
                    Slot::Missing if i == 0 => return Ok(FieldValue::Missing),
                    Slot::Missing => values.push(MISSING_INT),
                    Slot::Value(v) => values.push(v),
                }
            }
            Ok(FieldValue::IntVec(values))
        }
    }
}

/// Appends the encoding of `value` to `buf`. `id` only names the field in
/// errors. Nothing is written when an error is returned.
pub fn encode(id: &str, value: &FieldValue, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        FieldValue::Int(v) => {
            reject_leading_missing(id, *v == MISSING_INT)?;
            encode_ints(id, std::slice::from_ref(v), buf)
        }
        FieldValue::IntVec(values) => {
            reject_leading_missing(id, values.first() == Some(&MISSING_INT))?;
            encode_ints(id, values, buf)
        }
        FieldValue::Float(v) => {
            let narrowed = *v as f32;
            if v.is_finite() && !narrowed.is_finite() {
                return Err(Error::OutOfRange {
                    id: id.to_string(),
                    reason: format!("{} does not fit in a 32-bit float", v),
                });
            }
            encode_floats(id, &[narrowed], buf)
        }
        FieldValue::FloatVec(values) => {
            let leading = values.first().map(|v| v.to_bits());
            reject_leading_missing(id, leading == Some(MISSING_FLOAT_BITS))?;
            encode_floats(id, values, buf)
        }
        FieldValue::Str(s) => encode_chars(id, s.as_bytes(), buf),
        FieldValue::StrVec(values) => {
            if values.iter().any(|s| s.contains(',')) {
                return Err(Error::UnsupportedType {
                    id: id.to_string(),
                    value: "StrVec element containing ','",
                    kind: ValueKind::String.to_string(),
                });
            }
            // A lone empty element would read back as the empty vector
            if values.len() == 1 && values[0].is_empty() {
                return Err(Error::UnsupportedType {
                    id: id.to_string(),
                    value: "StrVec with a single empty element",
                    kind: ValueKind::String.to_string(),
                });
            }
            encode_chars(id, values.join(",").as_bytes(), buf)
        }
        FieldValue::Flag(true) => write_descriptor(id, Tag::Missing, 0, buf),
        FieldValue::Flag(false) => Err(Error::UnsupportedType {
            id: id.to_string(),
            value: "Flag(false)",
            kind: ValueKind::Flag.to_string(),
        }),
        FieldValue::Missing => {
            write_descriptor(id, Tag::Int8, 1, buf)?;
            buf.push(i8::MIN as u8);
            Ok(())
        }
    }
}

/// A missing first element decodes as [`FieldValue::Missing`], so callers
/// must say so explicitly.
fn reject_leading_missing(id: &str, leading_missing: bool) -> Result<()> {
    if leading_missing {
        return Err(Error::OutOfRange {
            id: id.to_string(),
            reason: "first element is the missing marker; store FieldValue::Missing instead"
                .to_string(),
        });
    }
    Ok(())
}

/// Encodes integers in the narrowest width that holds them all.
/// [`MISSING_INT`] elements become the width's missing sentinel.
pub fn encode_ints(id: &str, values: &[i64], buf: &mut Vec<u8>) -> Result<()> {
    let mut tag = Tag::Int8;
    for &v in values.iter().filter(|&&v| v != MISSING_INT) {
        if v < Tag::Int32.min_value() || v > Tag::Int32.max_value() {
            return Err(Error::OutOfRange {
                id: id.to_string(),
                reason: format!("{} does not fit in a 32-bit integer", v),
            });
        }
        if v < Tag::Int16.min_value() || v > Tag::Int16.max_value() {
            tag = Tag::Int32;
        } else if tag == Tag::Int8 && (v < Tag::Int8.min_value() || v > Tag::Int8.max_value()) {
            tag = Tag::Int16;
        }
    }

    write_descriptor(id, tag, values.len(), buf)?;
    for &v in values {
        match tag {
            Tag::Int8 => {
                let v = if v == MISSING_INT { i8::MIN } else { v as i8 };
                buf.push(v as u8);
            }
            Tag::Int16 => {
                let v = if v == MISSING_INT { i16::MIN } else { v as i16 };
                buf.extend_from_slice(&v.to_le_bytes());
            }
            _ => buf.extend_from_slice(&(v as i32).to_le_bytes()),
        }
    }
    Ok(())
}

/// Encodes 32-bit floats. Elements carrying the missing bit pattern are kept
/// as missing; the end-of-vector pattern is rejected.
pub fn encode_floats(id: &str, values: &[f32], buf: &mut Vec<u8>) -> Result<()> {
    if values
        .iter()
        .any(|v| v.to_bits() == END_OF_VECTOR_FLOAT_BITS)
    {
        return Err(Error::OutOfRange {
            id: id.to_string(),
            reason: "float carries the end-of-vector bit pattern".to_string(),
        });
    }
    write_descriptor(id, Tag::Float, values.len(), buf)?;
    for v in values {
        buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    Ok(())
}

pub fn encode_chars(id: &str, bytes: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    write_descriptor(id, Tag::Char, bytes.len(), buf)?;
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Encodes one INFO value as written in VCF text, typed by `kind`.
pub fn encode_text(id: &str, kind: ValueKind, text: &str, buf: &mut Vec<u8>) -> Result<()> {
    match kind {
        ValueKind::Flag => write_descriptor(id, Tag::Missing, 0, buf),
        ValueKind::String => encode_chars(id, text.as_bytes(), buf),
        ValueKind::Integer => {
            let values = text
                .split(',')
                .map(|t| match t {
                    "." => Ok(MISSING_INT),
                    _ => t.parse::<i64>().map_err(|e| {
                        Error::Decode(format!("{}: invalid Integer {:?}: {}", id, t, e))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            encode_ints(id, &values, buf)
        }
        ValueKind::Float => {
            let values = text
                .split(',')
                .map(|t| match t {
                    "." => Ok(MISSING_FLOAT),
                    _ => t.parse::<f32>().map_err(|e| {
                        Error::Decode(format!("{}: invalid Float {:?}: {}", id, t, e))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            encode_floats(id, &values, buf)
        }
    }
}

/// Encodes one `key[=value]` INFO entry. `definition` is `None` for keys the
/// schema does not declare; their text is stored as characters.
pub fn encode_entry(
    id: &str,
    definition: Option<&FieldDefinition>,
    text: Option<&str>,
    buf: &mut Vec<u8>,
) -> Result<()> {
    match (definition, text) {
        (Some(definition), _) if definition.kind == ValueKind::Flag => {
            encode(id, &FieldValue::Flag(true), buf)
        }
        (Some(_), None | Some(".")) => encode(id, &FieldValue::Missing, buf),
        (Some(definition), Some(text)) => encode_text(id, definition.kind, text, buf),
        (None, Some(text)) => encode_chars(id, text.as_bytes(), buf),
        (None, None) => encode(id, &FieldValue::Flag(true), buf),
    }
}

/// Renders a stored value as VCF INFO text. `None` means the key stands
/// alone (a flag).
pub fn render(src: &[u8]) -> Result<Option<String>> {
    let (value, _) = TypedValue::read(src)?;
    let mut out = String::new();

    match value.tag {
        Tag::Missing if value.count == 0 => return Ok(None),
        Tag::Missing => out.push('.'),
        Tag::Char => out.push_str(value.text()?),
        Tag::Float => {
            for (i, slot) in value.float_slots().enumerate() {
                match slot {
                    Slot::EndOfVector => break,
                    Slot::Missing => push_item(&mut out, i, "."),
                    Slot::Value(v) => {
                        if i > 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "{}", v);
                    }
                }
            }
        }
        Tag::Int8 | Tag::Int16 | Tag::Int32 => {
            for (i, slot) in value.int_slots().enumerate() {
                match slot {
                    Slot::EndOfVector => break,
                    Slot::Missing => push_item(&mut out, i, "."),
                    Slot::Value(v) => {
                        if i > 0 {
                            out.push(',');
                        }
                        let _ = write!(out, "{}", v);
                    }
                }
            }
        }
    }

    if out.is_empty() {
        out.push('.');
    }
    Ok(Some(out))
}

fn push_item(out: &mut String, i: usize, item: &str) {
    if i > 0 {
        out.push(',');
    }
    out.push_str(item);
}

fn write_descriptor(id: &str, tag: Tag, count: usize, buf: &mut Vec<u8>) -> Result<()> {
    if count < 15 {
        buf.push(((count as u8) << 4) | tag as u8);
        return Ok(());
    }
    let count = i64::try_from(count)
        .ok()
        .filter(|&n| n <= Tag::Int32.max_value())
        .ok_or_else(|| Error::OutOfRange {
            id: id.to_string(),
            reason: format!("{} elements is too many for one value", count),
        })?;
    buf.push(0xF0 | tag as u8);
    encode_ints(id, &[count], buf)
}
