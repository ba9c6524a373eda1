//! Raw line to [`Record`] decoding.

use crate::codec;
use crate::index::ColumnLayout;
use crate::record::Record;
use crate::schema::SchemaRef;
use crate::types::FileKind;
use crate::{Error, Result};
use bytes::Bytes;
use std::str::FromStr;

/// Turns raw lines into records for one file kind. Records share the
/// decoder's schema handle.
#[derive(Debug, Clone)]
pub struct Decoder {
    kind: FileKind,
    layout: ColumnLayout,
    schema: SchemaRef,
}

impl Decoder {
    pub fn new(kind: FileKind, layout: ColumnLayout, schema: impl Into<SchemaRef>) -> Self {
        Self {
            kind,
            layout,
            schema: schema.into(),
        }
    }

    /// `Ok(None)` for blank and comment lines.
    pub fn decode(&self, raw: Bytes) -> Result<Option<Record>> {
        if raw.is_empty() || raw[0] == self.layout.comment {
            return Ok(None);
        }

        let line = std::str::from_utf8(&raw)
            .map_err(|e| Error::Decode(format!("line is not UTF-8: {}", e)))?;

        let mut record = match self.kind {
            FileKind::Variant => self.decode_variant(line)?,
            FileKind::Interval => self.decode_interval(line)?,
            FileKind::Unknown => self.decode_columns(line)?,
        };
        record.raw = raw;

        Ok(Some(record))
    }

    fn decode_variant(&self, line: &str) -> Result<Record> {
        let mut columns = line.split('\t');
        let mut next = |name: &str| {
            columns
                .next()
                .ok_or_else(|| Error::Decode(format!("missing {} column", name)))
        };

        let contig = next("CHROM")?;
        let pos: u64 = parse(next("POS")?, "POS")?;
        let id = next("ID")?;
        let reference = next("REF")?;
        let alternates = next("ALT")?;
        let quality = next("QUAL")?;
        let filters = next("FILTER")?;
        let info = next("INFO")?;

        let start = pos
            .checked_sub(1)
            .ok_or_else(|| Error::Decode("POS must be at least 1".to_string()))?;
        let reference = dot(reference);
        let length = reference.map_or(1, |r| r.len() as u64);
        let end = start
            .checked_add(length)
            .ok_or_else(|| Error::Decode(format!("POS {} plus REF length overflows", pos)))?;

        let mut record = Record::new(contig, start, end, self.schema.clone());
        record.id = dot(id).map(str::to_string);
        record.reference = reference.map(str::to_string);
        record.alternates = dot(alternates).map(|a| a.split(',').map(str::to_string).collect());
        record.quality = dot(quality).map(|q| parse(q, "QUAL")).transpose()?;
        record.filters = dot(filters).map(|f| f.split(';').map(str::to_string).collect());

        if let Some(info) = dot(info) {
            self.decode_info(info, &mut record)?;
        }

        Ok(record)
    }

    fn decode_info(&self, info: &str, record: &mut Record) -> Result<()> {
        let schema = self.schema.read();
        for entry in info.split(';').filter(|e| !e.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (entry, None),
            };

            let definition = schema.get(key);
            let mut buf = Vec::new();
            codec::encode_entry(key, definition, value, &mut buf)?;
            // Undeclared keys are kept as text so the INFO column round-trips
            match definition {
                Some(_) => record.info.put_encoded(key, buf),
                None => record.info.put_undeclared(key, buf),
            }
        }
        Ok(())
    }

    fn decode_interval(&self, line: &str) -> Result<Record> {
        let mut columns = line.split('\t');
        let contig = columns
            .next()
            .ok_or_else(|| Error::Decode("missing chrom column".to_string()))?;
        let start: u64 = parse(column(columns.next(), "chromStart")?, "chromStart")?;
        let end: u64 = parse(column(columns.next(), "chromEnd")?, "chromEnd")?;
        if end < start {
            return Err(Error::Decode(format!(
                "chromEnd {} is before chromStart {}",
                end, start
            )));
        }

        let mut record = Record::new(contig, start, end, self.schema.clone());
        record.id = columns.next().and_then(dot).map(str::to_string);
        Ok(record)
    }

    fn decode_columns(&self, line: &str) -> Result<Record> {
        let columns: Vec<&str> = line.split('\t').collect();
        let layout = self.layout;

        let contig = column(columns.get(layout.contig).copied(), "contig")?;
        let mut start: u64 = parse(column(columns.get(layout.start).copied(), "start")?, "start")?;
        if !layout.zero_based {
            start = start
                .checked_sub(1)
                .ok_or_else(|| Error::Decode("1-based start must be at least 1".to_string()))?;
        }

        let end = match layout.end {
            Some(i) => parse(column(columns.get(i).copied(), "end")?, "end")?,
            None => start
                .checked_add(1)
                .ok_or_else(|| Error::Decode(format!("start {} has no room for an end", start)))?,
        };
        if end < start {
            return Err(Error::Decode(format!("end {} is before start {}", end, start)));
        }

        Ok(Record::new(contig, start, end, self.schema.clone()))
    }
}

fn column<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| Error::Decode(format!("missing {} column", name)))
}

fn parse<T>(text: &str, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e| Error::Decode(format!("invalid {} {:?}: {}", name, text, e)))
}

fn dot(text: &str) -> Option<&str> {
    (text != ".").then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use crate::schema::{FieldDefinition, Number, Schema, ValueKind};
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        let text = concat!(
            "##fileformat=VCFv4.2\n",
            "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n",
            "##INFO=<ID=AF,Number=A,Type=Float,Description=\"Frequency\">\n",
            "##INFO=<ID=DB,Number=0,Type=Flag,Description=\"dbSNP\">\n",
            "##INFO=<ID=AA,Number=1,Type=String,Description=\"Ancestral\">\n",
        );
        Arc::new(Schema::from_header_text(text))
    }

    fn variant(line: &str) -> Record {
        Decoder::new(FileKind::Variant, ColumnLayout::VCF, schema())
            .decode(Bytes::copy_from_slice(line.as_bytes()))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_variant_columns() {
        let record = variant("1\t51000\trs1\tACG\tT,C\t50\tPASS\tDP=20;AF=0.5,0.25;DB;AA=G");
        assert_eq!(record.contig(), "1");
        assert_eq!(record.start(), 50999);
        assert_eq!(record.end(), 51002);
        assert_eq!(record.id(), Some("rs1"));
        assert_eq!(record.reference(), Some("ACG"));
        assert_eq!(record.alternates().unwrap(), ["T", "C"]);
        assert_eq!(record.quality(), Some(50.0));
        assert_eq!(record.filters().unwrap(), ["PASS"]);

        assert_eq!(record.get_field("DP").unwrap(), Some(FieldValue::Int(20)));
        assert_eq!(
            record.get_field("AF").unwrap(),
            Some(FieldValue::FloatVec(vec![0.5, 0.25]))
        );
        assert_eq!(record.get_field("DB").unwrap(), Some(FieldValue::Flag(true)));
        assert_eq!(record.get_field("AA").unwrap(), Some(FieldValue::Str("G".into())));
    }

    #[test]
    fn test_variant_absent_columns() {
        let record = variant("1\t100\t.\tA\t.\t.\t.\t.");
        assert_eq!(record.id(), None);
        assert_eq!(record.alternates(), None);
        assert_eq!(record.quality(), None);
        assert_eq!(record.filters(), None);
        assert!(record.info().is_empty());
        assert_eq!(record.info().to_string(), ".");
    }

    #[test]
    fn test_variant_missing_and_undeclared_info() {
        let record = variant("1\t100\t.\tA\tG\t10\tPASS\tDP=.;XX=kept;LONE");
        assert_eq!(record.get_field("DP").unwrap(), Some(FieldValue::Missing));
        assert_eq!(record.get_field("XX").unwrap(), None);
        assert_eq!(record.info().ids().collect::<Vec<_>>(), ["DP", "XX", "LONE"]);
        assert_eq!(record.info().to_string(), "DP=.;XX=kept;LONE");
    }

    #[test]
    fn test_variant_raw_is_kept() {
        let line = "1\t100\t.\tA\tG\t10\tPASS\tDP=3";
        assert_eq!(variant(line).raw().as_ref(), line.as_bytes());
    }

    #[test]
    fn test_variant_malformed() {
        let decoder = Decoder::new(FileKind::Variant, ColumnLayout::VCF, schema());
        for line in [
            "1\t3x0000\t.\tA\tG\t10\tPASS\t.",
            "1\t0\t.\tA\tG\t10\tPASS\t.",
            "1\t100\t.\tA",
            "1\t100\t.\tA\tG\tbad\tPASS\t.",
            "1\t100\t.\tA\tG\t10\tPASS\tDP=many",
        ] {
            let result = decoder.decode(Bytes::copy_from_slice(line.as_bytes()));
            assert!(matches!(result, Err(Error::Decode(_))), "{}", line);
        }
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let decoder = Decoder::new(FileKind::Variant, ColumnLayout::VCF, schema());
        assert!(decoder.decode(Bytes::from_static(b"#CHROM\tPOS")).unwrap().is_none());
        assert!(decoder.decode(Bytes::new()).unwrap().is_none());
    }

    #[test]
    fn test_interval() {
        let decoder = Decoder::new(FileKind::Interval, ColumnLayout::BED, Arc::new(Schema::new()));
        let record = decoder
            .decode(Bytes::from_static(b"chr1\t1000\t1500\tfeature0\t0\t+"))
            .unwrap()
            .unwrap();
        assert_eq!((record.contig(), record.start(), record.end()), ("chr1", 1000, 1500));
        assert_eq!(record.id(), Some("feature0"));

        let insertion = decoder.decode(Bytes::from_static(b"chr2\t10\t10")).unwrap().unwrap();
        assert_eq!((insertion.start(), insertion.end()), (10, 10));
        assert_eq!(insertion.id(), None);

        let reversed = decoder.decode(Bytes::from_static(b"chr2\t20\t10"));
        assert!(matches!(reversed, Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_uses_layout() {
        let layout = ColumnLayout {
            contig: 1,
            start: 2,
            end: Some(3),
            zero_based: false,
            comment: b'%',
        };
        let decoder = Decoder::new(FileKind::Unknown, layout, Arc::new(Schema::new()));

        let record = decoder.decode(Bytes::from_static(b"x\tctg\t10\t14")).unwrap().unwrap();
        assert_eq!((record.contig(), record.start(), record.end()), ("ctg", 9, 14));
        assert!(decoder.decode(Bytes::from_static(b"%comment")).unwrap().is_none());
    }

    #[test]
    fn test_records_follow_decoder_schema() {
        let line = Bytes::from_static(b"1\t100\t.\tA\tG\t10\tPASS\tNEW=5;LATER=1,2");
        let new = || FieldDefinition::new("NEW", Number::Count(1), ValueKind::Integer, "added");

        // Decoded from the header: later declarations stay invisible
        let mut header = SchemaRef::from(schema());
        let record = Decoder::new(FileKind::Variant, ColumnLayout::VCF, header.clone())
            .decode(line.clone())
            .unwrap()
            .unwrap();
        header.declare(new()).unwrap();
        assert_eq!(record.get_field("NEW").unwrap(), None);
        assert!(!record.info().schema().read().contains("NEW"));

        // Decoded from a private schema: the same lock serves both
        let mut private = SchemaRef::from(schema());
        private.declare(new()).unwrap();
        let record = Decoder::new(FileKind::Variant, ColumnLayout::VCF, private.clone())
            .decode(line)
            .unwrap()
            .unwrap();
        assert_eq!(record.get_field("NEW").unwrap(), Some(FieldValue::Int(5)));
        assert_eq!(record.get_field("LATER").unwrap(), None);

        private
            .declare(FieldDefinition::new("LATER", Number::Unknown, ValueKind::Integer, ""))
            .unwrap();
        assert_eq!(
            record.get_field("LATER").unwrap(),
            Some(FieldValue::IntVec(vec![1, 2]))
        );
        assert_eq!(record.info().to_string(), "NEW=5;LATER=1,2");
    }

    #[test]
    fn test_coordinates_that_overflow_are_rejected() {
        let decoder = Decoder::new(FileKind::Variant, ColumnLayout::VCF, schema());
        let line = format!("1\t{}\t.\tACGT\tA\t10\tPASS\t.", u64::MAX);
        let result = decoder.decode(Bytes::from(line));
        assert!(matches!(result, Err(Error::Decode(_))));

        // A single base still fits
        let line = format!("1\t{}\t.\tA\tG\t10\tPASS\t.", u64::MAX);
        let record = decoder.decode(Bytes::from(line)).unwrap().unwrap();
        assert_eq!(record.end(), u64::MAX);

        let layout = ColumnLayout {
            contig: 0,
            start: 1,
            end: None,
            zero_based: true,
            comment: b'#',
        };
        let decoder = Decoder::new(FileKind::Unknown, layout, Arc::new(Schema::new()));
        let line = format!("ctg\t{}", u64::MAX);
        let result = decoder.decode(Bytes::from(line));
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
