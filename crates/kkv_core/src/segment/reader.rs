//! Per-segment lookup with its place in the search order.

use super::building::BuildingSegment;
use super::building_iter::BuildingValueIterator;
use super::built::BuiltSegment;
use super::built_iter::{BuiltValueIterator, SKeyFilter};
use crate::buffer::ResultBuffer;
use crate::error::CoreResult;
use crate::search::{Realm, SearchContext};
use std::sync::Arc;
use tracing::debug;

/// How an iterator uses the found set of its realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Check and record every skey.
    Insert,
    /// Check but do not record; nothing older in the realm reads the set.
    LookupOnly,
    /// Neither check nor record; the segment is alone in its realm.
    Skip,
}

/// Position of a segment within its realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRole {
    /// The only segment of the realm that is searched.
    pub only: bool,
    /// The oldest segment of the realm that is searched.
    pub last: bool,
}

impl SegmentRole {
    /// Role of the built segment at `index` among `count` searched ones.
    ///
    /// Whether a segment holds the pkey does not matter; both search modes
    /// assign roles from the planned segment list.
    pub fn built(index: usize, count: usize) -> Self {
        Self {
            only: count == 1,
            last: index + 1 == count,
        }
    }

    /// Picks the dedup mode.
    ///
    /// A filtered search always records found skeys since it counts them to
    /// stop early.
    pub fn dedup_mode(self, filtered: bool) -> DedupMode {
        if filtered {
            DedupMode::Insert
        } else if self.only {
            DedupMode::Skip
        } else if self.last {
            DedupMode::LookupOnly
        } else {
            DedupMode::Insert
        }
    }
}

/// A segment of either realm.
#[derive(Debug, Clone)]
pub enum Segment {
    /// In-memory segment.
    Building(Arc<BuildingSegment>),
    /// Sealed segment.
    Built(Arc<BuiltSegment>),
}

impl Segment {
    /// Returns the realm of the segment.
    pub fn realm(&self) -> Realm {
        match self {
            Self::Building(_) => Realm::Building,
            Self::Built(_) => Realm::Built,
        }
    }
}

/// Looks a pkey up in one segment.
#[derive(Debug, Clone)]
pub struct SegmentReader {
    segment: Segment,
    role: SegmentRole,
}

impl SegmentReader {
    /// Creates a reader.
    pub fn new(segment: Segment, role: SegmentRole) -> Self {
        Self { segment, role }
    }

    /// Returns the segment.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Returns the role of the segment.
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    /// Returns an iterator over the pkey's values, or `None` if the segment
    /// does not hold the pkey.
    ///
    /// For built segments the first chunk is read here.
    pub fn lookup(&self, ctx: &mut SearchContext) -> CoreResult<Option<SegmentIterator>> {
        let dedup = self.role.dedup_mode(ctx.is_filtered());
        match &self.segment {
            Segment::Building(segment) => {
                ctx.metrics_mut().building_segments_searched += 1;
                let Some(group) = segment.lookup(ctx.pkey()) else {
                    return Ok(None);
                };
                debug!(segment = %segment.id(), pkey = %ctx.pkey(), ?dedup, "searching building segment");
                Ok(Some(SegmentIterator::Building(BuildingValueIterator::new(
                    group,
                    Arc::clone(ctx.skeys()),
                    ctx.keep_sort_order(),
                    dedup,
                ))))
            }
            Segment::Built(segment) => {
                ctx.metrics_mut().record_built_lookup(segment.is_realtime());
                let Some(position) = segment.lookup(ctx.pkey()) else {
                    return Ok(None);
                };
                debug!(segment = %segment.id(), pkey = %ctx.pkey(), ?dedup, "searching built segment");
                let filter = SKeyFilter::new(
                    Arc::clone(ctx.skeys()),
                    segment.is_skey_sorted() && !ctx.keep_sort_order(),
                );
                let iter = BuiltValueIterator::open(Arc::clone(segment), position, filter, dedup)?;
                Ok(Some(SegmentIterator::Built(iter)))
            }
        }
    }
}

/// Iterator returned by [`SegmentReader::lookup`].
#[derive(Debug)]
pub enum SegmentIterator {
    /// Over a building segment.
    Building(BuildingValueIterator),
    /// Over a built segment.
    Built(BuiltValueIterator),
}

impl SegmentIterator {
    /// Returns true while positioned on an entry.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Building(iter) => iter.is_valid(),
            Self::Built(iter) => iter.is_valid(),
        }
    }

    /// Returns true if the pkey was deleted in this segment.
    pub fn has_pkey_tombstone(&self) -> bool {
        match self {
            Self::Building(iter) => iter.has_pkey_tombstone(),
            Self::Built(iter) => iter.has_pkey_tombstone(),
        }
    }

    /// Returns true once the segment has no more entries for the pkey.
    pub(crate) fn batch_get(
        &mut self,
        ctx: &mut SearchContext,
        buf: &mut ResultBuffer,
    ) -> CoreResult<bool> {
        match self {
            Self::Building(iter) => Ok(iter.batch_get(ctx, buf)),
            Self::Built(iter) => iter.batch_get(ctx, buf),
        }
    }
}

/// Plans the readers of a search: building segments first, then built
/// segments, each realm newest first.
pub(crate) fn plan_readers(
    building: &[Arc<BuildingSegment>],
    built: &[Arc<BuiltSegment>],
) -> Vec<SegmentReader> {
    let mut readers = Vec::with_capacity(building.len() + built.len());
    for (i, segment) in building.iter().enumerate() {
        let role = SegmentRole {
            only: building.len() == 1 && built.is_empty(),
            last: i + 1 == building.len() && built.is_empty(),
        };
        readers.push(SegmentReader::new(Segment::Building(Arc::clone(segment)), role));
    }
    for (i, segment) in built.iter().enumerate() {
        let role = SegmentRole::built(i, built.len());
        readers.push(SegmentReader::new(Segment::Built(Arc::clone(segment)), role));
    }
    readers
}
