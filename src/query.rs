//! Region query execution.
//!
//! A query leases the source's reader, resolves a plan, and scans it on a
//! dedicated producer thread. Records travel to the consumer over a bounded
//! channel. Dropping the [`Query`] closes the channel, which stops the
//! producer at its next send; the plan is released and the reader returned
//! to its source before the drop completes.

use crate::decode::Decoder;
use crate::index::RegionReader;
use crate::record::Record;
use crate::types::Region;
use crate::{Error, Result};
use std::ops::ControlFlow;
use std::thread::{self, JoinHandle};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Lifecycle of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Resolving,
    Streaming,
    Draining,
    Closed,
}

/// A reader with a resolved plan. The plan is released exactly once, on
/// [`Cursor::into_reader`] or on drop.
pub(crate) struct Cursor<R: RegionReader> {
    reader: Option<R>,
    plan: Option<R::Plan>,
}

impl<R: RegionReader> Cursor<R> {
    /// Takes the reader out of `home` and resolves `region` with it. On
    /// failure the reader goes back into `home`.
    pub(crate) fn lease(home: &mut Option<R>, region: &Region) -> Result<Self> {
        let reader = home.take().ok_or(Error::ReaderUnavailable)?;
        match reader.resolve(region) {
            Ok(plan) => Ok(Self {
                reader: Some(reader),
                plan: Some(plan),
            }),
            Err(e) => {
                *home = Some(reader);
                Err(e)
            }
        }
    }

    /// Decodes the plan's lines and hands every record overlapping `region`
    /// to `emit`, until the plan ends, `emit` breaks, or `is_cancelled`
    /// turns true. Malformed lines are skipped; a read error is emitted and
    /// ends the scan.
    pub(crate) fn scan(
        &mut self,
        decoder: &Decoder,
        region: &Region,
        is_cancelled: impl Fn() -> bool,
        mut emit: impl FnMut(Result<Record>) -> ControlFlow<()>,
    ) {
        let (Some(reader), Some(plan)) = (self.reader.as_mut(), self.plan.as_mut()) else {
            return;
        };

        let mut records = 0usize;
        let mut skipped = 0usize;

        while !is_cancelled() {
            let raw = match reader.next_raw(plan) {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    error!(%region, "read failed: {}", e);
                    let _ = emit(Err(e.into()));
                    break;
                }
            };
            trace!(len = raw.len(), "raw line");

            let record = match decoder.decode(raw) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%region, "skipping malformed record: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            // Sorted input: nothing after this can overlap
            if record.contig() == region.contig && record.start() >= region.end {
                break;
            }
            if !record.overlaps(region) {
                continue;
            }

            records += 1;
            if emit(Ok(record)).is_break() {
                debug!(%region, "consumer stopped early");
                break;
            }
        }

        debug!(%region, records, skipped, "scan finished");
    }

    fn release(&mut self) {
        if let (Some(reader), Some(plan)) = (self.reader.as_mut(), self.plan.take()) {
            reader.release(plan);
        }
    }

    /// Releases the plan and gives the reader back.
    pub(crate) fn into_reader(mut self) -> Option<R> {
        self.release();
        self.reader.take()
    }
}

impl<R: RegionReader> Drop for Cursor<R> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs a query to completion on the calling thread.
pub(crate) fn collect<R: RegionReader>(
    home: &mut Option<R>,
    decoder: &Decoder,
    region: &Region,
) -> Result<Vec<Record>> {
    let mut cursor = Cursor::lease(home, region)?;

    let mut records = Vec::new();
    let mut failure = None;
    cursor.scan(
        decoder,
        region,
        || false,
        |item| match item {
            Ok(record) => {
                records.push(record);
                ControlFlow::Continue(())
            }
            Err(e) => {
                failure = Some(e);
                ControlFlow::Break(())
            }
        },
    );
    *home = cursor.into_reader();

    match failure {
        Some(e) => Err(e),
        None => Ok(records),
    }
}

/// A streaming region query.
///
/// Yields records in file order. The source stays mutably borrowed until the
/// query is dropped, so one source runs one query at a time.
///
/// Async code should consume it with [`recv`](Query::recv). Blocking
/// iteration works outside a runtime and on a multi-thread runtime worker;
/// on a current-thread runtime it yields [`Error::BlockingInRuntime`] once
/// and ends the query.
pub struct Query<'s, R: RegionReader> {
    region: Region,
    home: &'s mut Option<R>,
    receiver: Option<mpsc::Receiver<Result<Record>>>,
    producer: Option<JoinHandle<Option<R>>>,
    state: QueryState,
}

impl<'s, R> Query<'s, R>
where
    R: RegionReader + Send + 'static,
    R::Plan: Send + 'static,
{
    pub(crate) fn start(
        home: &'s mut Option<R>,
        decoder: Decoder,
        region: Region,
        queue_depth: usize,
    ) -> Result<Self> {
        let mut cursor = Cursor::lease(home, &region)?;

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let scan_region = region.clone();
        let producer = thread::Builder::new()
            .name(format!("query-{}", region.contig))
            .spawn(move || {
                cursor.scan(
                    &decoder,
                    &scan_region,
                    || tx.is_closed(),
                    |item| match tx.blocking_send(item) {
                        Ok(()) => ControlFlow::Continue(()),
                        Err(_) => ControlFlow::Break(()),
                    },
                );
                cursor.into_reader()
            })
            .map_err(|e| {
                error!(%region, "failed to start query producer: {}", e);
                Error::Io(e)
            })?;

        debug!(%region, queue_depth, "query started");

        Ok(Self {
            region,
            home,
            receiver: Some(rx),
            producer: Some(producer),
            state: QueryState::Streaming,
        })
    }

    /// Async counterpart of [`Iterator::next`].
    pub async fn recv(&mut self) -> Option<Result<Record>> {
        let item = self.receiver.as_mut()?.recv().await;
        if item.is_none() {
            self.finish();
        }
        item
    }
}

impl<R: RegionReader> Query<'_, R> {
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Stops the query early. Equivalent to dropping it.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.state == QueryState::Closed {
            return;
        }
        self.state = QueryState::Draining;

        // Closing the channel is the producer's stop signal
        drop(self.receiver.take());

        if let Some(producer) = self.producer.take() {
            match producer.join() {
                Ok(reader) => *self.home = reader,
                Err(_) => error!(region = %self.region, "query producer panicked, reader lost"),
            }
        }

        self.state = QueryState::Closed;
        debug!(region = %self.region, "query closed");
    }
}

impl<R: RegionReader> Iterator for Query<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.receiver.as_mut()?;
        let item = match Handle::try_current() {
            Err(_) => receiver.blocking_recv(),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| receiver.blocking_recv())
            }
            Ok(_) => {
                warn!(region = %self.region, "blocking iteration on a current-thread runtime");
                self.finish();
                return Some(Err(Error::BlockingInRuntime));
            }
        };
        if item.is_none() {
            self.finish();
        }
        item
    }
}

impl<R: RegionReader> Drop for Query<'_, R> {
    fn drop(&mut self) {
        self.finish();
    }
}
