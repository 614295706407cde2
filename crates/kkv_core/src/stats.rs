//! Segment statistics and per-search metrics.
//!
//! Segment counters are shared by every search that touches the segment and
//! can be read while searches are in progress. Search metrics belong to one
//! search call.

use std::sync::atomic::{AtomicU64, Ordering};

/// I/O counters of a built segment.
#[derive(Debug, Default)]
pub struct SegmentStats {
    /// Key-table lookups.
    lookups: AtomicU64,
    /// Chunks read from the data store.
    chunk_reads: AtomicU64,
    /// Chunk payload bytes read.
    bytes_read: AtomicU64,
    /// Values read from the value store.
    value_reads: AtomicU64,
    /// Value bytes read.
    value_bytes_read: AtomicU64,
}

impl SegmentStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key-table lookup.
    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a chunk read.
    pub(crate) fn record_chunk_read(&self, bytes: u64) {
        self.chunk_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a value read.
    pub(crate) fn record_value_read(&self, bytes: u64) {
        self.value_reads.fetch_add(1, Ordering::Relaxed);
        self.value_bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns the number of key-table lookups.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of chunk reads.
    pub fn chunk_reads(&self) -> u64 {
        self.chunk_reads.load(Ordering::Relaxed)
    }

    /// Returns the chunk payload bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the number of value reads.
    pub fn value_reads(&self) -> u64 {
        self.value_reads.load(Ordering::Relaxed)
    }

    /// Returns the value bytes read.
    pub fn value_bytes_read(&self) -> u64 {
        self.value_bytes_read.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> SegmentStatsSnapshot {
        SegmentStatsSnapshot {
            lookups: self.lookups(),
            chunk_reads: self.chunk_reads(),
            bytes_read: self.bytes_read(),
            value_reads: self.value_reads(),
            value_bytes_read: self.value_bytes_read(),
        }
    }
}

/// A point-in-time snapshot of segment statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentStatsSnapshot {
    /// Key-table lookups.
    pub lookups: u64,
    /// Chunks read.
    pub chunk_reads: u64,
    /// Chunk payload bytes read.
    pub bytes_read: u64,
    /// Values read from the value store.
    pub value_reads: u64,
    /// Value bytes read.
    pub value_bytes_read: u64,
}

/// Counters of a single search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchMetrics {
    /// Building segments consulted.
    pub building_segments_searched: u64,
    /// Built segments whose key table was consulted.
    pub built_segments_searched: u64,
    /// Realtime built segments consulted.
    pub realtime_segments_searched: u64,
    /// Built segments skipped because every entry is older than the TTL bound.
    pub expired_segments_skipped: u64,
    /// Built segments skipped because the watermark covers their locator.
    pub obsolete_segments_skipped: u64,
    /// Entries emitted with the duplicate flag.
    pub duplicates_emitted: u64,
    /// Segment tasks spawned by a concurrent search.
    pub tasks_spawned: u64,
}

impl SearchMetrics {
    pub(crate) fn record_built_lookup(&mut self, realtime: bool) {
        self.built_segments_searched += 1;
        if realtime {
            self.realtime_segments_searched += 1;
        }
    }
}
