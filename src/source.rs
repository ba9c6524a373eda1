//! Open record files and the queries run against them.

use crate::decode::Decoder;
use crate::index::{ColumnLayout, RegionReader, TabixReader};
use crate::query::{self, Query};
use crate::record::Record;
use crate::schema::{FieldDefinition, Schema, SchemaRef, ValueKind};
use crate::types::{FileKind, Region};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const DEFAULT_QUEUE_DEPTH: usize = 20;

#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Records buffered between the producer thread and the consumer.
    pub queue_depth: usize,
    /// Index to use instead of `<path>.tbi` / `<path>.csi`.
    pub index_path: Option<PathBuf>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            index_path: None,
        }
    }
}

/// An open, indexed record file.
///
/// The schema starts out shared with the parsed file header. The first
/// [`add_field_definition`](Source::add_field_definition) switches the source
/// to a private copy; [`header`](Source::header) keeps returning the original.
/// Records decoded from the private copy look definitions up through it, so
/// they also see fields declared after they were read.
pub struct Source<R: RegionReader = TabixReader> {
    path: PathBuf,
    kind: FileKind,
    reader: Option<R>,
    header: Arc<Schema>,
    schema: SchemaRef,
    layout: ColumnLayout,
    options: SourceOptions,
    closed: bool,
}

impl Source<TabixReader> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, SourceOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: SourceOptions) -> Result<Self> {
        let path = path.as_ref();
        let kind = FileKind::from_path(path);
        let mut reader = TabixReader::open(path, options.index_path.as_deref())?;

        let schema = if kind.is_variant() {
            Schema::from_header_text(&reader.read_header()?)
        } else {
            Schema::new()
        };

        info!(
            path = %path.display(),
            ?kind,
            fields = schema.len(),
            "opened source"
        );

        Ok(Self::from_parts(path, kind, reader, Arc::new(schema), options))
    }
}

impl<R: RegionReader> Source<R> {
    /// Builds a source around an already opened reader and parsed header.
    pub fn from_parts(
        path: impl Into<PathBuf>,
        kind: FileKind,
        reader: R,
        schema: Arc<Schema>,
        options: SourceOptions,
    ) -> Self {
        let layout = match kind {
            FileKind::Variant => ColumnLayout::VCF,
            FileKind::Interval => ColumnLayout::BED,
            FileKind::Unknown => reader.layout(),
        };

        Self {
            path: path.into(),
            kind,
            reader: Some(reader),
            header: Arc::clone(&schema),
            schema: SchemaRef::shared(schema),
            layout,
            options,
            closed: false,
        }
    }

    fn decoder(&self) -> Result<Decoder> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(Decoder::new(self.kind, self.layout, self.schema.clone()))
    }

    /// Runs `region` to completion and returns every overlapping record.
    pub fn fetch(&mut self, region: &Region) -> Result<Vec<Record>> {
        let decoder = self.decoder()?;
        query::collect(&mut self.reader, &decoder, region)
    }

    pub fn fetch_str(&mut self, region: &str) -> Result<Vec<Record>> {
        self.fetch(&region.parse()?)
    }

    /// Declares a new INFO field on this source's private schema.
    ///
    /// `number` uses header notation (`1`, `A`, `R`, `G`, `.`). Records
    /// decoded from the file header before the first call do not see the new
    /// field.
    pub fn add_field_definition(
        &mut self,
        id: &str,
        number: &str,
        kind: ValueKind,
        description: &str,
    ) -> Result<()> {
        self.declare(FieldDefinition::new(id, number.parse()?, kind, description))
    }

    pub fn declare(&mut self, definition: FieldDefinition) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let id = definition.id.clone();
        self.schema.declare(definition)?;

        let schema = self.schema.read();
        if !schema.is_synchronized() {
            error!(%id, definitions = schema.len(), "schema lookup out of sync after declare");
            panic!("schema lookup out of sync after declaring {}", id);
        }

        debug!(%id, path = %self.path.display(), "declared field");
        Ok(())
    }

    /// The schema new queries decode with.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The schema parsed from the file header, unaffected by later
    /// declarations.
    pub fn header(&self) -> &Arc<Schema> {
        &self.header
    }

    pub fn schema_is_shared(&self) -> bool {
        self.schema.is_shared()
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn contigs(&self) -> Vec<String> {
        self.reader
            .as_ref()
            .map(RegionReader::contigs)
            .unwrap_or_default()
    }

    /// Drops the reader. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.reader = None;
        self.closed = true;
        debug!(path = %self.path.display(), "closed source");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<R> Source<R>
where
    R: RegionReader + Send + 'static,
    R::Plan: Send + 'static,
{
    /// Starts a streaming query. The returned [`Query`] borrows the source
    /// until it is dropped.
    pub fn query(&mut self, region: &Region) -> Result<Query<'_, R>> {
        let decoder = self.decoder()?;
        let queue_depth = self.options.queue_depth;
        Query::start(&mut self.reader, decoder, region.clone(), queue_depth)
    }

    /// Like [`query`](Source::query), parsing `chr:start-end` first.
    pub fn query_str(&mut self, region: &str) -> Result<Query<'_, R>> {
        let region: Region = region.parse()?;
        self.query(&region)
    }
}
