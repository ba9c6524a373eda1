use super::RegionReader;
use crate::types::Region;
use crate::{Error, Result};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory reader over tab-delimited lines, grouped per contig. Every
/// line of a contig is part of its plan, so the engine's overlap filter
/// does the real work.
pub(crate) struct MemoryReader {
    contigs: Vec<(String, Vec<Bytes>)>,
    fail_at: Option<usize>,
    pub(crate) releases: Arc<AtomicUsize>,
    pub(crate) reads: Arc<AtomicUsize>,
}

pub(crate) struct MemoryPlan {
    lines: Vec<Bytes>,
    next: usize,
}

impl MemoryReader {
    pub(crate) fn new(lines: &[&str]) -> Self {
        let mut contigs: Vec<(String, Vec<Bytes>)> = Vec::new();
        for line in lines {
            let contig = line.split('\t').next().unwrap_or_default().to_string();
            let bytes = Bytes::copy_from_slice(line.as_bytes());
            match contigs.iter_mut().find(|(name, _)| *name == contig) {
                Some((_, group)) => group.push(bytes),
                None => contigs.push((contig, vec![bytes])),
            }
        }

        Self {
            contigs,
            fail_at: None,
            releases: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails the `n`th line read of every plan with an I/O error.
    pub(crate) fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub(crate) fn release_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl RegionReader for MemoryReader {
    type Plan = MemoryPlan;

    fn resolve(&self, region: &Region) -> Result<MemoryPlan> {
        let (_, lines) = self
            .contigs
            .iter()
            .find(|(name, _)| *name == region.contig)
            .ok_or_else(|| Error::UnknownContig(region.contig.clone()))?;

        Ok(MemoryPlan {
            lines: lines.clone(),
            next: 0,
        })
    }

    fn next_raw(&mut self, plan: &mut MemoryPlan) -> io::Result<Option<Bytes>> {
        if self.fail_at == Some(plan.next) {
            plan.next += 1;
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated block"));
        }

        let line = plan.lines.get(plan.next).cloned();
        if line.is_some() {
            plan.next += 1;
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(line)
    }

    fn release(&mut self, _plan: MemoryPlan) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn contigs(&self) -> Vec<String> {
        self.contigs.iter().map(|(name, _)| name.clone()).collect()
    }
}
