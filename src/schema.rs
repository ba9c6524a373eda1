//! INFO field definitions and the copy-on-write schema a source decodes with.
//!
//! A [`Schema`] is append-only: definitions are declared once and their kind
//! never changes. Sources start from a [`SchemaRef::Shared`] schema parsed
//! from the file header and switch to a private [`SchemaRef::Owned`] copy the
//! first time a definition is added.

use crate::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Declared `Type=` of an INFO field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
    String,
    Flag,
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Integer" => Ok(ValueKind::Integer),
            "Float" => Ok(ValueKind::Float),
            "String" | "Character" => Ok(ValueKind::String),
            "Flag" => Ok(ValueKind::Flag),
            _ => Err(Error::InvalidDefinition(format!("unknown Type: {}", s))),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Integer => "Integer",
            ValueKind::Float => "Float",
            ValueKind::String => "String",
            ValueKind::Flag => "Flag",
        };
        f.write_str(s)
    }
}

/// Declared `Number=` of an INFO field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Number {
    Count(usize),
    /// `A`: one value per alternate allele.
    AlternateBases,
    /// `R`: one value per allele, reference included.
    ReferenceAlternateBases,
    /// `G`: one value per genotype.
    Samples,
    /// `.`
    Unknown,
}

impl Number {
    /// Scalar slots decode through the single-value path.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Number::Count(1))
    }
}

impl FromStr for Number {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(Number::AlternateBases),
            "R" => Ok(Number::ReferenceAlternateBases),
            "G" => Ok(Number::Samples),
            "." => Ok(Number::Unknown),
            _ => s
                .parse()
                .map(Number::Count)
                .map_err(|_| Error::InvalidDefinition(format!("invalid Number: {}", s))),
        }
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Number::Count(n)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Count(n) => write!(f, "{}", n),
            Number::AlternateBases => f.write_str("A"),
            Number::ReferenceAlternateBases => f.write_str("R"),
            Number::Samples => f.write_str("G"),
            Number::Unknown => f.write_str("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub id: String,
    pub number: Number,
    pub kind: ValueKind,
    pub description: String,
}

impl FieldDefinition {
    pub fn new(
        id: impl Into<String>,
        number: Number,
        kind: ValueKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            number,
            kind,
            description: description.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidDefinition("empty ID".to_string()));
        }
        if self
            .id
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | ';' | ',' | '<' | '>'))
        {
            return Err(Error::InvalidDefinition(format!(
                "ID contains a reserved character: {}",
                self.id
            )));
        }
        match (self.kind, self.number) {
            (ValueKind::Flag, Number::Count(0)) => Ok(()),
            (ValueKind::Flag, number) => Err(Error::InvalidDefinition(format!(
                "{}: Flag fields must have Number=0, got {}",
                self.id, number
            ))),
            (kind, Number::Count(0)) => Err(Error::InvalidDefinition(format!(
                "{}: Number=0 is only valid for Flag, got {}",
                self.id, kind
            ))),
            _ => Ok(()),
        }
    }
}

/// Renders the definition as a VCF `##INFO` meta line.
impl fmt::Display for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "##INFO=<ID={},Number={},Type={},Description=\"{}\">",
            self.id,
            self.number,
            self.kind,
            self.description.replace('"', "\\\"")
        )
    }
}

impl FromStr for FieldDefinition {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let body = line
            .trim()
            .strip_prefix("##INFO=<")
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(|| Error::InvalidDefinition(format!("not an INFO line: {}", line)))?;

        let mut id = None;
        let mut number = None;
        let mut kind = None;
        let mut description = String::new();

        for (key, value) in split_meta_fields(body) {
            match key {
                "ID" => id = Some(value),
                "Number" => number = Some(value.parse()?),
                "Type" => kind = Some(value.parse()?),
                "Description" => description = value,
                _ => {}
            }
        }

        let missing = |key: &str| Error::InvalidDefinition(format!("{} missing {}", line, key));
        let definition = FieldDefinition {
            id: id.ok_or_else(|| missing("ID"))?,
            number: number.ok_or_else(|| missing("Number"))?,
            kind: kind.ok_or_else(|| missing("Type"))?,
            description,
        };
        definition.validate()?;
        Ok(definition)
    }
}

/// Splits `key=value,key="quoted, value"` pairs, honoring quotes and `\"`.
fn split_meta_fields(body: &str) -> Vec<(&str, String)> {
    let mut fields = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim();

        if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut chars = quoted.char_indices();
            let mut consumed = quoted.len();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        consumed = i + 1;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            fields.push((key, value));
            rest = quoted[consumed..].trim_start_matches(',');
        } else {
            let (value, after) = after.split_once(',').unwrap_or((after, ""));
            fields.push((key, value.to_string()));
            rest = after;
        }
    }

    fields
}

/// Declared INFO fields with an id → definition lookup.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    definitions: Vec<FieldDefinition>,
    lookup: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the `##INFO` lines of a VCF header. Other lines are ignored
    /// and malformed or repeated INFO lines are skipped with a warning.
    pub fn from_header_text(text: &str) -> Self {
        let mut schema = Schema::new();
        for line in text.lines().filter(|l| l.starts_with("##INFO=<")) {
            let declared = line
                .parse::<FieldDefinition>()
                .and_then(|definition| schema.declare(definition));
            if let Err(e) = declared {
                warn!("skipping header line {:?}: {}", line, e);
            }
        }
        schema
    }

    /// Whether `definition` could be declared, without declaring it.
    pub fn check(&self, definition: &FieldDefinition) -> Result<()> {
        definition.validate()?;
        if self.lookup.contains_key(&definition.id) {
            return Err(Error::DuplicateField(definition.id.clone()));
        }
        Ok(())
    }

    pub fn declare(&mut self, definition: FieldDefinition) -> Result<()> {
        self.check(&definition)?;
        self.definitions.push(definition);
        self.rebuild_lookup();
        Ok(())
    }

    fn rebuild_lookup(&mut self) {
        self.lookup = self
            .definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
    }

    /// True when every definition is reachable through the lookup table.
    pub fn is_synchronized(&self) -> bool {
        self.lookup.len() == self.definitions.len()
            && self
                .definitions
                .iter()
                .enumerate()
                .all(|(i, d)| self.lookup.get(&d.id) == Some(&i))
    }

    pub fn get(&self, id: &str) -> Option<&FieldDefinition> {
        self.lookup.get(id).map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// `##INFO` lines for every definition, in declaration order.
    pub fn header_lines(&self) -> Vec<String> {
        self.definitions.iter().map(ToString::to_string).collect()
    }
}

/// A schema that is either still shared with the on-disk header or has been
/// copied into a private instance.
///
/// Clones are lookup handles. A source and every record it decoded from the
/// private copy hold the same lock, so the copy is made once per source and
/// later declarations are visible through all of them.
#[derive(Debug, Clone)]
pub enum SchemaRef {
    Shared(Arc<Schema>),
    Owned(Arc<RwLock<Schema>>),
}

/// Read access to a [`SchemaRef`].
pub enum SchemaGuard<'a> {
    Shared(&'a Schema),
    Owned(RwLockReadGuard<'a, Schema>),
}

impl Deref for SchemaGuard<'_> {
    type Target = Schema;

    fn deref(&self) -> &Schema {
        match self {
            SchemaGuard::Shared(schema) => schema,
            SchemaGuard::Owned(guard) => &**guard,
        }
    }
}

impl From<Arc<Schema>> for SchemaRef {
    fn from(schema: Arc<Schema>) -> Self {
        SchemaRef::Shared(schema)
    }
}

impl SchemaRef {
    pub fn shared(schema: Arc<Schema>) -> Self {
        SchemaRef::Shared(schema)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, SchemaRef::Shared(_))
    }

    /// Holds the read lock of a private schema until the guard drops.
    pub fn read(&self) -> SchemaGuard<'_> {
        match self {
            SchemaRef::Shared(schema) => SchemaGuard::Shared(schema),
            SchemaRef::Owned(lock) => SchemaGuard::Owned(lock.read()),
        }
    }

    /// True when both handles look up through the same schema instance.
    pub fn same_schema(&self, other: &SchemaRef) -> bool {
        match (self, other) {
            (SchemaRef::Shared(a), SchemaRef::Shared(b)) => Arc::ptr_eq(a, b),
            (SchemaRef::Owned(a), SchemaRef::Owned(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Adds `definition` to the private schema, copying the shared one on
    /// first use. A rejected definition leaves the reference untouched.
    pub fn declare(&mut self, definition: FieldDefinition) -> Result<()> {
        self.read().check(&definition)?;
        let lock = self.private();
        let mut schema = lock.write();
        schema.declare(definition)
    }

    fn private(&mut self) -> Arc<RwLock<Schema>> {
        let lock = match self {
            SchemaRef::Owned(lock) => return Arc::clone(lock),
            SchemaRef::Shared(shared) => {
                debug!(
                    definitions = shared.len(),
                    "copying shared schema before first declaration"
                );
                Arc::new(RwLock::new(Schema::clone(shared)))
            }
        };
        *self = SchemaRef::Owned(Arc::clone(&lock));
        lock
    }
}
