//! Search that visits segments one at a time on the caller's thread.

use crate::buffer::ResultBuffer;
use crate::error::CoreResult;
use crate::search::SearchContext;
use crate::segment::{plan_readers, BuiltSegment, SegmentIterator, SegmentReader, SegmentSet};
use crate::stats::SearchMetrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resumable search over building then built segments.
///
/// Each [`batch_get`](Self::batch_get) fills the caller's buffer and picks
/// up exactly where the previous call stopped.
#[derive(Debug)]
pub struct SyncIterator {
    readers: Vec<SegmentReader>,
    next_reader: usize,
    current: Option<SegmentIterator>,
    ctx: SearchContext,
    quota: usize,
    valid: bool,
}

impl SyncIterator {
    pub(crate) fn new(segments: &SegmentSet, mut ctx: SearchContext, quota: usize) -> Self {
        let built: Vec<Arc<BuiltSegment>> = segments
            .built()
            .iter()
            .filter(|segment| ctx.should_search(segment))
            .cloned()
            .collect();
        let readers = plan_readers(segments.building(), &built);
        Self {
            readers,
            next_reader: 0,
            current: None,
            ctx,
            quota,
            valid: quota > 0,
        }
    }

    /// Returns true while more rows may follow.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns true if a pkey tombstone ended the search.
    pub fn has_pkey_tombstone(&self) -> bool {
        self.ctx.has_pkey_tombstone()
    }

    /// Returns the search state.
    pub fn context(&self) -> &SearchContext {
        &self.ctx
    }

    /// Returns the counters of this search.
    pub fn metrics(&self) -> &SearchMetrics {
        self.ctx.metrics()
    }

    /// Fills `buf` with the next batch.
    ///
    /// On error the buffer is emptied and the iterator becomes invalid.
    pub fn batch_get(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        buf.clear();
        if !self.valid {
            buf.mark_exhausted();
            return Ok(());
        }
        buf.set_quota(self.quota);

        match self.fill(buf).and_then(|()| buf.resolve_values()) {
            Ok(()) => {
                self.quota = buf.remaining_quota();
                self.settle_validity(buf);
                Ok(())
            }
            Err(err) => {
                warn!(pkey = %self.ctx.pkey(), error = %err, "search failed");
                buf.discard();
                self.finish();
                Err(err)
            }
        }
    }

    fn fill(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        loop {
            if !buf.can_accept() {
                return Ok(());
            }
            if self.ctx.all_wanted_found() {
                debug!(pkey = %self.ctx.pkey(), "all wanted skeys found");
                self.finish();
                return Ok(());
            }
            if self.current.is_none() {
                if !self.open_next()? {
                    self.finish();
                    return Ok(());
                }
                continue;
            }
            let Some(current) = self.current.as_mut() else {
                continue;
            };
            if current.batch_get(&mut self.ctx, buf)? {
                let tombstone = current.has_pkey_tombstone();
                self.current = None;
                if tombstone {
                    debug!(pkey = %self.ctx.pkey(), "pkey tombstone ends search");
                    self.ctx.mark_pkey_tombstone();
                    self.finish();
                    return Ok(());
                }
            }
        }
    }

    fn open_next(&mut self) -> CoreResult<bool> {
        while let Some(reader) = self.readers.get(self.next_reader) {
            self.next_reader += 1;
            if let Some(iter) = reader.lookup(&mut self.ctx)? {
                self.current = Some(iter);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish(&mut self) {
        self.valid = false;
        self.current = None;
        self.next_reader = self.readers.len();
    }

    /// A parked spill row keeps the iterator alive for one more call; the
    /// call that hands out the last row is the one that invalidates it.
    fn settle_validity(&mut self, buf: &mut ResultBuffer) {
        if buf.has_spill() {
            self.valid = true;
        } else if buf.reach_limit() {
            self.valid = false;
        }
        if !self.valid && !buf.reach_limit() {
            buf.mark_exhausted();
        }
    }
}
