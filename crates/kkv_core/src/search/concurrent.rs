//! Search that reads built segments in parallel tasks.
//!
//! Building segments are searched inline first. Each built segment holding
//! the pkey is then read by its own task. Completion order does not matter:
//! results are merged strictly newest segment first, so the output equals
//! that of [`SyncIterator`](super::SyncIterator) for the same request.

use crate::buffer::ResultBuffer;
use crate::error::CoreResult;
use crate::search::{Admission, Realm, SearchContext};
use crate::segment::{
    plan_readers, BuiltSegment, BuiltValueIterator, DedupMode, KeyTableEntry, SKeyFilter,
    SegmentIterator, SegmentReader, SegmentRole, SegmentSet,
};
use crate::stats::SearchMetrics;
use crate::types::SegmentId;
use crate::value::RawEntry;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Building,
    FanOut,
    Merge,
    Done,
}

/// Entries one task read from one built segment.
#[derive(Debug)]
struct SegmentResult {
    segment: SegmentId,
    role: SegmentRole,
    pkey_tombstone: bool,
    entries: VecDeque<RawEntry>,
}

/// Resumable search that fans built-segment reads out to tokio tasks.
#[derive(Debug)]
pub struct ConcurrentIterator {
    building: Vec<SegmentReader>,
    next_building: usize,
    current: Option<SegmentIterator>,
    built: Vec<Arc<BuiltSegment>>,
    results: Vec<SegmentResult>,
    merged: usize,
    phase: Phase,
    ctx: SearchContext,
    quota: usize,
    valid: bool,
}

impl ConcurrentIterator {
    pub(crate) fn new(segments: &SegmentSet, mut ctx: SearchContext, quota: usize) -> Self {
        let built: Vec<Arc<BuiltSegment>> = segments
            .built()
            .iter()
            .filter(|segment| ctx.should_search(segment))
            .cloned()
            .collect();
        // Built readers are replaced by tasks; only the building roles matter.
        let mut building = plan_readers(segments.building(), &built);
        building.truncate(segments.building().len());
        Self {
            building,
            next_building: 0,
            current: None,
            built,
            results: Vec::new(),
            merged: 0,
            phase: Phase::Building,
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
    /// The first call that reaches the built realm awaits every segment
    /// task before merging. On error the buffer is emptied and the iterator
    /// becomes invalid.
    pub async fn batch_get(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        buf.clear();
        if !self.valid {
            buf.mark_exhausted();
            return Ok(());
        }
        buf.set_quota(self.quota);

        let result = match self.fill(buf).await {
            Ok(()) => buf.resolve_values_async().await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                self.quota = buf.remaining_quota();
                if buf.has_spill() {
                    self.valid = true;
                } else if buf.reach_limit() {
                    self.valid = false;
                }
                if !self.valid && !buf.reach_limit() {
                    buf.mark_exhausted();
                }
                Ok(())
            }
            Err(err) => {
                warn!(pkey = %self.ctx.pkey(), error = %err, "concurrent search failed");
                buf.discard();
                self.finish();
                Err(err)
            }
        }
    }

    async fn fill(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        loop {
            if self.phase == Phase::Done || !buf.can_accept() {
                return Ok(());
            }
            if self.ctx.all_wanted_found() {
                debug!(pkey = %self.ctx.pkey(), "all wanted skeys found");
                self.finish();
                return Ok(());
            }
            match self.phase {
                Phase::Building => self.search_building(buf)?,
                Phase::FanOut => {
                    self.fan_out().await?;
                    self.phase = Phase::Merge;
                }
                Phase::Merge => {
                    if self.merge(buf) {
                        self.finish();
                    }
                }
                Phase::Done => return Ok(()),
            }
        }
    }

    fn search_building(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        if let Some(current) = self.current.as_mut() {
            if current.batch_get(&mut self.ctx, buf)? {
                let tombstone = current.has_pkey_tombstone();
                self.current = None;
                if tombstone {
                    debug!(pkey = %self.ctx.pkey(), "pkey tombstone in building segment; built segments skipped");
                    self.ctx.mark_pkey_tombstone();
                    self.finish();
                }
            }
            return Ok(());
        }

        while let Some(reader) = self.building.get(self.next_building) {
            self.next_building += 1;
            if let Some(iter) = reader.lookup(&mut self.ctx)? {
                self.current = Some(iter);
                return Ok(());
            }
        }

        if self.built.is_empty() {
            self.finish();
        } else {
            self.phase = Phase::FanOut;
        }
        Ok(())
    }

    /// Spawns one task per built segment holding the pkey and awaits them
    /// in recency order.
    ///
    /// Key-table lookups run here, before spawning, so a pkey tombstone in
    /// a newer segment stops older segments from being scheduled at all.
    async fn fan_out(&mut self) -> CoreResult<()> {
        let mut tasks = Vec::new();
        let count = self.built.len();
        for (index, segment) in self.built.iter().enumerate() {
            self.ctx.metrics_mut().record_built_lookup(segment.is_realtime());
            let Some(position) = segment.lookup(self.ctx.pkey()) else {
                continue;
            };
            let filter = SKeyFilter::new(
                Arc::clone(self.ctx.skeys()),
                segment.is_skey_sorted() && !self.ctx.keep_sort_order(),
            );
            let role = SegmentRole::built(index, count);
            tasks.push(tokio::spawn(read_segment(Arc::clone(segment), position, filter, role)));
            self.ctx.metrics_mut().tasks_spawned += 1;

            if position.has_pkey_tombstone() {
                debug!(segment = %segment.id(), pkey = %self.ctx.pkey(), "pkey tombstone; older segments not scheduled");
                break;
            }
        }
        debug!(pkey = %self.ctx.pkey(), tasks = tasks.len(), "spawned segment tasks");

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await??);
        }
        self.results = results;
        Ok(())
    }

    /// Merges task results newest segment first. Returns true once every
    /// result is merged or a pkey tombstone ends the search.
    fn merge(&mut self, buf: &mut ResultBuffer) -> bool {
        let total = self.results.len();
        let filtered = self.ctx.is_filtered();
        while self.merged < total {
            let result = &mut self.results[self.merged];
            let dedup = result.role.dedup_mode(filtered);

            loop {
                if !buf.can_accept() || self.ctx.all_wanted_found() {
                    return false;
                }
                let Some(entry) = result.entries.pop_front() else {
                    break;
                };
                if let Admission::Emit { duplicate } = self.ctx.admit(Realm::Built, entry.meta, dedup) {
                    let (value, pending) = entry.into_value_entry(duplicate);
                    buf.emplace_back(value, pending);
                }
            }

            if result.pkey_tombstone {
                debug!(segment = %result.segment, pkey = %self.ctx.pkey(), "pkey tombstone ends search");
                self.ctx.mark_pkey_tombstone();
                return true;
            }
            self.merged += 1;
        }
        true
    }

    fn finish(&mut self) {
        self.phase = Phase::Done;
        self.valid = false;
        self.current = None;
        self.results.clear();
    }
}

async fn read_segment(
    segment: Arc<BuiltSegment>,
    position: KeyTableEntry,
    filter: SKeyFilter,
    role: SegmentRole,
) -> CoreResult<SegmentResult> {
    let id = segment.id();
    let iter = BuiltValueIterator::open_async(segment, position, filter, DedupMode::Insert).await?;
    Ok(SegmentResult {
        segment: id,
        role,
        pkey_tombstone: position.has_pkey_tombstone(),
        entries: iter.collect_async().await?.into(),
    })
}
