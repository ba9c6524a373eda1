use crate::codec;
use crate::schema::{FieldDefinition, SchemaRef, ValueKind};
use crate::types::Region;
use crate::{Error, Result};
use bytes::Bytes;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;

/// A decoded INFO value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
    Flag(bool),
    IntVec(Vec<i64>),
    FloatVec(Vec<f32>),
    StrVec(Vec<String>),
    /// Present in the record but explicitly missing (`.`).
    Missing,
}

impl FieldValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "Int",
            FieldValue::Float(_) => "Float",
            FieldValue::Str(_) => "Str",
            FieldValue::Flag(_) => "Flag",
            FieldValue::IntVec(_) => "IntVec",
            FieldValue::FloatVec(_) => "FloatVec",
            FieldValue::StrVec(_) => "StrVec",
            FieldValue::Missing => "Missing",
        }
    }

    fn fits(&self, definition: &FieldDefinition) -> bool {
        let vector_slot = !definition.number.is_scalar();
        match (definition.kind, self) {
            (ValueKind::Flag, FieldValue::Flag(_)) => true,
            (ValueKind::Flag, _) => false,
            (_, FieldValue::Missing) => true,
            (ValueKind::Integer, FieldValue::Int(_)) => true,
            (ValueKind::Integer, FieldValue::IntVec(_)) => vector_slot,
            (ValueKind::Float, FieldValue::Float(_)) => true,
            (ValueKind::Float, FieldValue::FloatVec(_)) => vector_slot,
            (ValueKind::String, FieldValue::Str(_)) => true,
            (ValueKind::String, FieldValue::StrVec(_)) => vector_slot,
            _ => false,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Flag(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<Vec<i64>> for FieldValue {
    fn from(v: Vec<i64>) -> Self {
        FieldValue::IntVec(v)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::FloatVec(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::StrVec(v)
    }
}

/// The encoded INFO fields of one record.
///
/// Entries keep their file order. Lookups go through the schema handle the
/// record was decoded with, so a definition added to a source's private
/// schema is visible to records already decoded from it. Ids the schema does
/// not declare read as absent.
#[derive(Debug, Clone)]
pub struct FieldSet {
    schema: SchemaRef,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    buf: Vec<u8>,
    /// False for text kept while the id was undeclared.
    typed: bool,
}

impl FieldSet {
    pub fn new(schema: impl Into<SchemaRef>) -> Self {
        Self {
            schema: schema.into(),
            entries: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// `Ok(None)` when the field is absent from the record or the schema.
    pub fn get(&self, id: &str) -> Result<Option<FieldValue>> {
        let schema = self.schema.read();
        let (Some(definition), Some(i)) = (schema.get(id), self.position(id)) else {
            return Ok(None);
        };

        let entry = &self.entries[i];
        if entry.typed {
            return codec::decode(&entry.buf, definition).map(Some);
        }

        // Declared after this record was read
        let text = codec::render(&entry.buf)?;
        let mut buf = Vec::new();
        codec::encode_entry(id, Some(definition), text.as_deref(), &mut buf)?;
        codec::decode(&buf, definition).map(Some)
    }

    /// Encodes `value` under `id`, replacing any earlier value.
    /// `Flag(false)` removes the field.
    pub fn set(&mut self, id: &str, value: impl Into<FieldValue>) -> Result<()> {
        let value = value.into();
        let encoded = {
            let schema = self.schema.read();
            let definition = schema
                .get(id)
                .ok_or_else(|| Error::UndeclaredField(id.to_string()))?;

            if !value.fits(definition) {
                return Err(Error::UnsupportedType {
                    id: id.to_string(),
                    value: value.variant_name(),
                    kind: format!("{},Number={}", definition.kind, definition.number),
                });
            }

            if value == FieldValue::Flag(false) {
                None
            } else {
                let mut buf = Vec::new();
                codec::encode(id, &value, &mut buf)?;
                Some(buf)
            }
        };

        match encoded {
            Some(buf) => self.put_encoded(id, buf),
            None => {
                self.delete(id);
            }
        }
        Ok(())
    }

    /// Stores bytes encoded against the id's definition.
    pub(crate) fn put_encoded(&mut self, id: &str, buf: Vec<u8>) {
        self.put(id, buf, true);
    }

    /// Stores the text of an id the schema does not declare.
    pub(crate) fn put_undeclared(&mut self, id: &str, buf: Vec<u8>) {
        self.put(id, buf, false);
    }

    fn put(&mut self, id: &str, buf: Vec<u8>, typed: bool) {
        match self.position(id) {
            Some(i) => self.entries[i] = Entry { id: id.to_string(), buf, typed },
            None => self.entries.push(Entry { id: id.to_string(), buf, typed }),
        }
    }

    /// Removes the field; returns whether it was present.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schema.read().contains(id) && self.position(id).is_some()
    }

    /// Ids of every stored entry, declared or not.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// VCF INFO column text; `.` when empty.
impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str(".");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            f.write_str(&entry.id)?;
            match codec::render(&entry.buf) {
                Ok(Some(text)) => write!(f, "={}", text)?,
                Ok(None) => {}
                Err(_) => f.write_str("=.")?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for entry in &self.entries {
            if let Ok(Some(value)) = self.get(&entry.id) {
                map.serialize_entry(&entry.id, &value)?;
            }
        }
        map.end()
    }
}

/// One record from a region query.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub(crate) contig: String,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) id: Option<String>,
    pub(crate) reference: Option<String>,
    pub(crate) alternates: Option<Vec<String>>,
    pub(crate) quality: Option<f32>,
    pub(crate) filters: Option<Vec<String>>,
    pub(crate) info: FieldSet,
    #[serde(skip)]
    pub(crate) raw: Bytes,
}

impl Record {
    /// A record with coordinates only.
    pub fn new(
        contig: impl Into<String>,
        start: u64,
        end: u64,
        schema: impl Into<SchemaRef>,
    ) -> Self {
        Self {
            contig: contig.into(),
            start,
            end,
            id: None,
            reference: None,
            alternates: None,
            quality: None,
            filters: None,
            info: FieldSet::new(schema),
            raw: Bytes::new(),
        }
    }

    pub fn contig(&self) -> &str {
        &self.contig
    }

    /// 0-based start.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn alternates(&self) -> Option<&[String]> {
        self.alternates.as_deref()
    }

    pub fn quality(&self) -> Option<f32> {
        self.quality
    }

    pub fn filters(&self) -> Option<&[String]> {
        self.filters.as_deref()
    }

    pub fn info(&self) -> &FieldSet {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut FieldSet {
        &mut self.info
    }

    /// The line as read from the file, without its newline.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn get_field(&self, id: &str) -> Result<Option<FieldValue>> {
        self.info.get(id)
    }

    pub fn set_field(&mut self, id: &str, value: impl Into<FieldValue>) -> Result<()> {
        self.info.set(id, value)
    }

    pub fn delete_field(&mut self, id: &str) -> bool {
        self.info.delete(id)
    }

    pub fn overlaps(&self, region: &Region) -> bool {
        self.contig == region.contig && region.overlaps(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MISSING_FLOAT, MISSING_INT};
    use crate::schema::{FieldDefinition, Number, Schema};
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        let mut schema = Schema::new();
        for (id, number, kind) in [
            ("DP", Number::Count(1), ValueKind::Integer),
            ("XXX", Number::Count(1), ValueKind::Float),
            ("many", Number::Count(3), ValueKind::Float),
            ("manyi", Number::Count(3), ValueKind::Integer),
            ("flag", Number::Count(0), ValueKind::Flag),
            ("AA", Number::Count(1), ValueKind::String),
            ("CSQ", Number::Unknown, ValueKind::String),
        ] {
            schema
                .declare(FieldDefinition::new(id, number, kind, "test"))
                .unwrap();
        }
        Arc::new(schema)
    }

    fn record() -> Record {
        Record::new("1", 100, 101, schema())
    }

    #[test]
    fn test_set_get_scalars_and_vectors() {
        let mut rec = record();
        rec.set_field("DP", 23i64).unwrap();
        rec.set_field("many", vec![33.0f32, 33.0, 44.0]).unwrap();
        rec.set_field("manyi", vec![22i64, 1, 2]).unwrap();
        rec.set_field("XXX", 23.5f64).unwrap();

        assert_eq!(rec.get_field("DP").unwrap(), Some(FieldValue::Int(23)));
        assert_eq!(
            rec.get_field("many").unwrap(),
            Some(FieldValue::FloatVec(vec![33.0, 33.0, 44.0]))
        );
        assert_eq!(
            rec.get_field("manyi").unwrap(),
            Some(FieldValue::IntVec(vec![22, 1, 2]))
        );
        assert_eq!(rec.get_field("XXX").unwrap(), Some(FieldValue::Float(23.5)));
    }

    #[test]
    fn test_flag_presence() {
        let mut rec = record();
        rec.set_field("flag", true).unwrap();
        assert_eq!(rec.get_field("flag").unwrap(), Some(FieldValue::Flag(true)));
        rec.set_field("flag", false).unwrap();
        assert_eq!(rec.get_field("flag").unwrap(), None);
        assert!(!rec.info().contains("flag"));
    }

    #[test]
    fn test_absent_missing_and_type_errors_are_distinct() {
        let mut rec = record();
        assert_eq!(rec.get_field("DP").unwrap(), None);
        assert_eq!(rec.get_field("NOPE").unwrap(), None);

        rec.set_field("DP", FieldValue::Missing).unwrap();
        assert_eq!(rec.get_field("DP").unwrap(), Some(FieldValue::Missing));

        let err = rec.set_field("DP", vec![1.0f32]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { value: "FloatVec", .. }));
        assert_eq!(rec.get_field("DP").unwrap(), Some(FieldValue::Missing));

        assert!(matches!(
            rec.set_field("flag", 1i64),
            Err(Error::UnsupportedType { .. })
        ));
        assert!(matches!(
            rec.set_field("DP", vec![1i64, 2]),
            Err(Error::UnsupportedType { .. })
        ));
        assert!(matches!(
            rec.set_field("NOPE", 1i64),
            Err(Error::UndeclaredField(_))
        ));
    }

    #[test]
    fn test_out_of_range_leaves_previous_value() {
        let mut rec = record();
        rec.set_field("DP", 7i64).unwrap();
        let err = rec.set_field("DP", i64::MAX).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert_eq!(rec.get_field("DP").unwrap(), Some(FieldValue::Int(7)));
    }

    #[test]
    fn test_leading_missing_vector_leaves_previous_value() {
        let mut rec = record();
        rec.set_field("manyi", vec![22i64, 1, 2]).unwrap();

        let err = rec.set_field("manyi", vec![MISSING_INT, 5, 6]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        let err = rec.set_field("many", vec![MISSING_FLOAT, 1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert_eq!(
            rec.get_field("manyi").unwrap(),
            Some(FieldValue::IntVec(vec![22, 1, 2]))
        );

        rec.set_field("manyi", FieldValue::Missing).unwrap();
        assert_eq!(rec.get_field("manyi").unwrap(), Some(FieldValue::Missing));
    }

    #[test]
    fn test_later_declaration_reaches_held_record() {
        let mut schema = SchemaRef::from(schema());
        schema
            .declare(FieldDefinition::new("first", Number::Count(1), ValueKind::Integer, ""))
            .unwrap();

        let mut rec = Record::new("1", 100, 101, schema.clone());
        let mut text = Vec::new();
        crate::codec::encode_chars("LATE", b"5,6", &mut text).unwrap();
        rec.info_mut().put_undeclared("LATE", text);
        assert_eq!(rec.get_field("LATE").unwrap(), None);

        schema
            .declare(FieldDefinition::new("LATE", Number::Unknown, ValueKind::Integer, ""))
            .unwrap();
        assert!(rec.info().schema().same_schema(&schema));
        assert_eq!(
            rec.get_field("LATE").unwrap(),
            Some(FieldValue::IntVec(vec![5, 6]))
        );
        assert_eq!(rec.info().to_string(), "LATE=5,6");
    }

    #[test]
    fn test_delete_and_display() {
        let mut rec = record();
        assert_eq!(rec.info().to_string(), ".");

        rec.set_field("DP", 23i64).unwrap();
        rec.set_field("flag", true).unwrap();
        rec.set_field("manyi", vec![22i64, 1, 2]).unwrap();
        rec.set_field("CSQ", vec!["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(rec.info().to_string(), "DP=23;flag;manyi=22,1,2;CSQ=a,b");

        assert!(rec.delete_field("flag"));
        assert!(!rec.delete_field("flag"));
        assert_eq!(rec.info().len(), 3);
        assert_eq!(rec.info().to_string(), "DP=23;manyi=22,1,2;CSQ=a,b");
    }

    #[test]
    fn test_serialize_info() {
        let mut rec = record();
        rec.set_field("DP", 23i64).unwrap();
        rec.set_field("flag", true).unwrap();
        rec.set_field("AA", "G").unwrap();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["contig"], "1");
        assert_eq!(json["start"], 100);
        assert_eq!(json["info"]["DP"], 23);
        assert_eq!(json["info"]["flag"], true);
        assert_eq!(json["info"]["AA"], "G");
    }

    #[test]
    fn test_overlaps() {
        let rec = record();
        assert!(rec.overlaps(&Region::new("1", 0, 101).unwrap()));
        assert!(!rec.overlaps(&Region::new("1", 101, 200).unwrap()));
        assert!(!rec.overlaps(&Region::new("2", 0, 200).unwrap()));
    }
}
