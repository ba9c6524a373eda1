use super::{ColumnLayout, RegionReader};
use crate::types::Region;
use crate::{Error, Result};
use bytes::Bytes;
use noodles::bgzf::{self, VirtualPosition};
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi;
use noodles::csi::binning_index::BinningIndex;
use noodles::csi::binning_index::index::header::format::{CoordinateSystem, Format};
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::tabix;
use std::fs::File;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use tracing::debug;

// 2^(min_shift + 3 * depth) for tabix's fixed 14/5 binning
const TABIX_MAX_POSITION: u64 = 1 << 29;

/// A bgzip-compressed file with a tabix or CSI index.
pub struct TabixReader {
    reader: bgzf::Reader<File>,
    index: Box<dyn BinningIndex + Send + Sync>,
    index_path: PathBuf,
}

/// The merged chunk list of one query and the read position within it.
#[derive(Debug)]
pub struct TabixPlan {
    chunks: Vec<Chunk>,
    next: usize,
    positioned: bool,
    buf: Vec<u8>,
}

impl TabixPlan {
    /// Compressed byte ranges the plan visits, as virtual positions.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }
}

impl TabixReader {
    /// Opens `path` and its index. Without an explicit `index_path`, looks
    /// for `<path>.tbi` and then `<path>.csi`.
    pub fn open(path: &Path, index_path: Option<&Path>) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;

        let index_path = match index_path {
            Some(p) if p.exists() => p.to_path_buf(),
            Some(p) => return Err(Error::MissingIndex(p.to_path_buf())),
            None => Self::find_index(path).ok_or_else(|| Error::MissingIndex(path.to_path_buf()))?,
        };

        let index = Self::load_index(&index_path)?;
        debug!(path = %path.display(), index = %index_path.display(), "opened indexed file");

        Ok(Self {
            reader: bgzf::Reader::new(file),
            index,
            index_path,
        })
    }

    fn find_index(path: &Path) -> Option<PathBuf> {
        // Appended convention first (calls.vcf.gz.tbi), then replaced (calls.vcf.tbi)
        ["tbi", "csi"].iter().find_map(|ext| {
            let appended = PathBuf::from(format!("{}.{}", path.display(), ext));
            if appended.exists() {
                return Some(appended);
            }
            let replaced = path.with_extension(ext);
            replaced.exists().then_some(replaced)
        })
    }

    fn load_index(index_path: &Path) -> Result<Box<dyn BinningIndex + Send + Sync>> {
        let is_csi = index_path.extension().is_some_and(|ext| ext == "csi");

        let index: Box<dyn BinningIndex + Send + Sync> = if is_csi {
            Box::new(csi::read(index_path).map_err(|e| {
                Error::InvalidIndex(format!("failed to read CSI index: {}", e))
            })?)
        } else {
            Box::new(tabix::read(index_path).map_err(|e| {
                Error::InvalidIndex(format!("failed to read tabix index: {}", e))
            })?)
        };

        if index.header().is_none() {
            return Err(Error::InvalidIndex(format!(
                "{} has no tabix header",
                index_path.display()
            )));
        }

        Ok(index)
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Reads the `#`-prefixed header lines at the start of the file.
    pub fn read_header(&mut self) -> Result<String> {
        self.reader.seek(VirtualPosition::from(0))?;

        let mut text = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 || !line.starts_with('#') {
                break;
            }
            text.push_str(&line);
        }

        Ok(text)
    }

    fn interval(region: &Region) -> Result<Interval> {
        let position = |n: u64| {
            usize::try_from(n)
                .ok()
                .and_then(|n| Position::try_from(n).ok())
                .ok_or_else(|| Error::InvalidRegion(format!("invalid position: {}", n)))
        };

        let start = position(region.start + 1)?;
        // Bounds past the smallest index's span are left open
        if region.end >= TABIX_MAX_POSITION {
            Ok(Interval::from(start..))
        } else {
            Ok(Interval::from(start..=position(region.end)?))
        }
    }

    /// Merge overlapping or adjacent chunks so no line is read twice
    fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        if chunks.is_empty() {
            return chunks;
        }

        chunks.sort_by_key(|c| c.start());

        let mut merged = Vec::with_capacity(chunks.len());
        let mut current = chunks[0];

        for chunk in chunks.into_iter().skip(1) {
            if chunk.start() <= current.end() {
                current = Chunk::new(current.start(), current.end().max(chunk.end()));
            } else {
                merged.push(current);
                current = chunk;
            }
        }
        merged.push(current);

        merged
    }
}

impl RegionReader for TabixReader {
    type Plan = TabixPlan;

    fn resolve(&self, region: &Region) -> Result<TabixPlan> {
        let header = self
            .index
            .header()
            .ok_or_else(|| Error::InvalidIndex("index has no tabix header".to_string()))?;

        let reference_sequence_id = header
            .reference_sequence_names()
            .get_index_of(region.contig.as_str())
            .ok_or_else(|| Error::UnknownContig(region.contig.clone()))?;

        let chunks = self
            .index
            .query(reference_sequence_id, Self::interval(region)?)
            .map_err(|e| Error::InvalidRegion(format!("{}: {}", region, e)))?;

        let chunks = Self::merge_chunks(chunks);
        debug!(%region, chunks = chunks.len(), "resolved query plan");

        Ok(TabixPlan {
            chunks,
            next: 0,
            positioned: false,
            buf: Vec::new(),
        })
    }

    fn next_raw(&mut self, plan: &mut TabixPlan) -> io::Result<Option<Bytes>> {
        loop {
            let Some(&chunk) = plan.chunks.get(plan.next) else {
                return Ok(None);
            };

            if !plan.positioned {
                self.reader.seek(chunk.start())?;
                plan.positioned = true;
            }

            if self.reader.virtual_position() >= chunk.end() {
                plan.next += 1;
                plan.positioned = false;
                continue;
            }

            plan.buf.clear();
            if self.reader.read_until(b'\n', &mut plan.buf)? == 0 {
                plan.next = plan.chunks.len();
                return Ok(None);
            }

            let mut line = plan.buf.as_slice();
            while let Some((b'\n' | b'\r', rest)) = line.split_last() {
                line = rest;
            }
            return Ok(Some(Bytes::copy_from_slice(line)));
        }
    }

    fn release(&mut self, plan: TabixPlan) {
        debug!(
            chunks = plan.chunks.len(),
            visited = plan.next,
            "released query plan"
        );
    }

    fn layout(&self) -> ColumnLayout {
        let Some(header) = self.index.header() else {
            return ColumnLayout::VCF;
        };

        ColumnLayout {
            contig: header.reference_sequence_name_index(),
            start: header.start_position_index(),
            end: header.end_position_index(),
            zero_based: matches!(header.format(), Format::Generic(CoordinateSystem::Bed)),
            comment: header.line_comment_prefix(),
        }
    }

    fn contigs(&self) -> Vec<String> {
        self.index
            .header()
            .map(|header| {
                header
                    .reference_sequence_names()
                    .iter()
                    .map(|name| name.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}
