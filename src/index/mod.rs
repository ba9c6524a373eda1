//! Region index collaborators.
//!
//! A [`RegionReader`] owns a compressed record file and its region index. It
//! turns a region into a query plan, hands out raw lines from that plan, and
//! is told exactly once when the plan is no longer needed.
//!
//! # Implementations
//!
//! - [`TabixReader`] - bgzip files with a `.tbi` or `.csi` index, via noodles

mod tabix;

#[cfg(test)]
pub(crate) mod memory;

pub use tabix::{TabixPlan, TabixReader};

use crate::Result;
use crate::types::Region;
use bytes::Bytes;
use std::io;

/// Where coordinates live in a tab-delimited record line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    /// 0-based column of the contig name.
    pub contig: usize,
    /// 0-based column of the start position.
    pub start: usize,
    /// 0-based column of the end position, if any.
    pub end: Option<usize>,
    /// Whether the start column is 0-based (BED style).
    pub zero_based: bool,
    /// Lines starting with this byte are skipped.
    pub comment: u8,
}

impl ColumnLayout {
    pub const VCF: Self = Self {
        contig: 0,
        start: 1,
        end: None,
        zero_based: false,
        comment: b'#',
    };

    pub const BED: Self = Self {
        contig: 0,
        start: 1,
        end: Some(2),
        zero_based: true,
        comment: b'#',
    };
}

/// Index and decompression handles for one record file.
pub trait RegionReader {
    /// Per-query cursor state.
    type Plan;

    /// Looks up the blocks to visit for `region`. Fails with
    /// [`Error::UnknownContig`](crate::Error::UnknownContig) when the index
    /// does not know the contig.
    fn resolve(&self, region: &Region) -> Result<Self::Plan>;

    /// The next raw line of the plan, without its line terminator, or
    /// `None` once the plan is exhausted.
    fn next_raw(&mut self, plan: &mut Self::Plan) -> io::Result<Option<Bytes>>;

    /// Releases a resolved plan. Called exactly once per plan.
    fn release(&mut self, plan: Self::Plan);

    /// Column layout recorded in the index.
    fn layout(&self) -> ColumnLayout {
        ColumnLayout::VCF
    }

    /// Contig names known to the index, in index order.
    fn contigs(&self) -> Vec<String> {
        Vec::new()
    }
}
