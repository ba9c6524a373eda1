use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Record shape of a source file, inferred from its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// BED-like intervals: contig, 0-based start, end.
    Interval,
    /// VCF records with a typed INFO field set.
    Variant,
    /// Anything else; only coordinates and the raw line are decoded.
    #[default]
    Unknown,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if [".vcf.gz", ".vcf.bgz"].iter().any(|s| name.ends_with(s)) {
            FileKind::Variant
        } else if [".bed.gz", ".bed.bgz"].iter().any(|s| name.ends_with(s)) {
            FileKind::Interval
        } else {
            FileKind::Unknown
        }
    }

    pub fn is_variant(&self) -> bool {
        matches!(self, FileKind::Variant)
    }
}

/// A contig plus a 0-based half-open interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub contig: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(contig: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        let contig = contig.into();
        if contig.is_empty() {
            return Err(Error::InvalidRegion("empty contig name".to_string()));
        }
        if start >= end {
            return Err(Error::InvalidRegion(format!(
                "{}:{}-{} is empty",
                contig, start, end
            )));
        }
        Ok(Self { contig, start, end })
    }

    /// The whole contig.
    pub fn contig(contig: impl Into<String>) -> Result<Self> {
        Self::new(contig, 0, u64::MAX)
    }

    /// Half-open overlap test; a zero-length interval overlaps when its
    /// position falls inside the region.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        if start == end {
            return start >= self.start && start < self.end;
        }
        start < self.end && end > self.start
    }
}

/// Parses `contig`, `contig:start` or `contig:start-end` with 1-based
/// inclusive coordinates. Commas in numbers are ignored.
impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((contig, range)) = s.rsplit_once(':') else {
            return Self::contig(s);
        };

        let parse = |n: &str| -> Result<u64> {
            n.replace(',', "")
                .parse::<u64>()
                .map_err(|e| Error::InvalidRegion(format!("{}: {}", s, e)))
        };

        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (parse(start)?, parse(end)?),
            None => (parse(range)?, u64::MAX),
        };

        if start == 0 {
            return Err(Error::InvalidRegion(format!(
                "{}: positions are 1-based",
                s
            )));
        }

        Self::new(contig, start - 1, end)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end == u64::MAX {
            write!(f, "{}:{}", self.contig, self.start + 1)
        } else {
            write!(f, "{}:{}-{}", self.contig, self.start + 1, self.end)
        }
    }
}
