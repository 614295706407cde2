//! Segment fixtures and search helpers.
//!
//! Provides builders for built segments, the three-generation reference
//! scenario, and helpers that drain a search into a flat row list.

use kkv_core::{
    BuildingSegment, BuiltSegment, BuiltSegmentWriter, CoreResult, KkvIterator, KkvReader, PKey,
    ResultBuffer, SKey, SearchMetrics, SearchRequest, SegmentConfig, SegmentId, SegmentSet,
    SyncIterator, Timestamp, ValueEntry, ValueLayout,
};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Every value layout, with a fixed length of [`FIXED_VALUE_LEN`] bytes
/// where the layout is fixed.
pub const LAYOUTS: [ValueLayout; 4] = [
    ValueLayout::inline_variable(),
    ValueLayout::inline_fixed(FIXED_VALUE_LEN),
    ValueLayout::offset_variable(),
    ValueLayout::offset_fixed(FIXED_VALUE_LEN),
];

/// Length of values in fixed-length fixture layouts.
pub const FIXED_VALUE_LEN: u32 = 2;

/// Query time of the reference scenario.
pub const SCENARIO_NOW: Timestamp = 901;

/// A TTL long enough to keep every scenario entry alive.
pub const SCENARIO_TTL: u64 = 1_000_000;

/// Seals a built segment in memory.
///
/// # Panics
///
/// Panics if a write or the seal fails.
pub fn built_segment(
    config: SegmentConfig,
    write: impl FnOnce(&mut BuiltSegmentWriter),
) -> Arc<BuiltSegment> {
    let mut writer = BuiltSegmentWriter::new(config);
    write(&mut writer);
    Arc::new(writer.finish_in_memory().expect("Failed to seal segment"))
}

/// Writes a value, panicking on a layout mismatch.
pub fn put(writer: &mut BuiltSegmentWriter, pkey: u64, skey: u64, value: &[u8], ts: Timestamp) {
    writer
        .put(PKey::new(pkey), SKey::new(skey), value.to_vec(), ts, None)
        .expect("Failed to write value");
}

/// Builds the reference scenario with built segments in `layout`.
///
/// - A (built, id 1): pkey 1 {skey 1 = "v1"@100, skey 2 = "v2"@200},
///   pkey 2 {skey 1 = "o1"@100}, pkey 4 {skey 1 = "g1"@100}
/// - B (built, id 2): pkey 1 {skey 2 deleted@400, then "v3"@500},
///   pkey 4 deleted@500
/// - C (building, id 3): pkey 1 {skey 2 = "v4"@800}, pkey 2 deleted@600
///
/// With an unbounded TTL, pkey 1 yields skey 2 "v4"@800, skey 2 "v3"@500
/// as a duplicate and skey 1 "v1"@100. Pkeys 2 and 4 yield nothing.
pub fn scenario(layout: ValueLayout) -> SegmentSet {
    let a = built_segment(SegmentConfig::new(SegmentId::new(1)).layout(layout), |w| {
        put(w, 1, 1, b"v1", 100);
        put(w, 1, 2, b"v2", 200);
        put(w, 2, 1, b"o1", 100);
        put(w, 4, 1, b"g1", 100);
    });
    let b = built_segment(SegmentConfig::new(SegmentId::new(2)).layout(layout), |w| {
        w.delete_skey(PKey::new(1), SKey::new(2), 400);
        put(w, 1, 2, b"v3", 500);
        w.delete_pkey(PKey::new(4), 500);
    });
    let c = Arc::new(BuildingSegment::new(SegmentId::new(3)));
    c.put(PKey::new(1), SKey::new(2), b"v4".to_vec(), 800, None);
    c.delete_pkey(PKey::new(2), 600);

    SegmentSet::new().with_building(c).with_built(a).with_built(b)
}

/// Everything a drained search produced.
#[derive(Debug, Clone, Default)]
pub struct Drained {
    /// Rows of every batch, duplicates included.
    pub rows: Vec<ValueEntry>,
    /// Number of `batch_get` calls made.
    pub batches: usize,
    /// Whether a pkey tombstone ended the search.
    pub pkey_tombstone: bool,
    /// Search counters.
    pub metrics: SearchMetrics,
}

impl Drained {
    /// Returns the non-duplicate rows.
    pub fn visible(&self) -> Vec<&ValueEntry> {
        self.rows.iter().filter(|entry| !entry.duplicate).collect()
    }

    /// Returns `(skey, timestamp, duplicate)` per row.
    pub fn summary(&self) -> Vec<(u64, Timestamp, bool)> {
        self.rows
            .iter()
            .map(|entry| (entry.skey.as_u64(), entry.timestamp, entry.duplicate))
            .collect()
    }
}

/// Drains a blocking iterator with a buffer of `rows` rows.
pub fn drain_sync(iter: &mut SyncIterator, rows: usize) -> CoreResult<Drained> {
    let mut buf = ResultBuffer::new(rows);
    let mut drained = Drained::default();
    while iter.is_valid() {
        iter.batch_get(&mut buf)?;
        drained.batches += 1;
        drained.rows.extend(buf.take_entries());
    }
    drained.pkey_tombstone = iter.has_pkey_tombstone();
    drained.metrics = *iter.metrics();
    Ok(drained)
}

/// Drains an iterator of either mode with a buffer of `rows` rows.
pub async fn drain_iter(iter: &mut KkvIterator, rows: usize) -> CoreResult<Drained> {
    let mut buf = ResultBuffer::new(rows);
    let mut drained = Drained::default();
    while iter.is_valid() {
        iter.batch_get(&mut buf).await?;
        drained.batches += 1;
        drained.rows.extend(buf.take_entries());
    }
    drained.pkey_tombstone = iter.has_pkey_tombstone();
    drained.metrics = *iter.metrics();
    Ok(drained)
}

/// Runs a blocking search to completion.
pub fn drain_blocking(
    reader: &KkvReader,
    segments: &SegmentSet,
    request: &SearchRequest,
    rows: usize,
) -> CoreResult<Vec<ValueEntry>> {
    let mut iter = reader.search_blocking(segments, request);
    Ok(drain_sync(&mut iter, rows)?.rows)
}

/// Runs a concurrent search to completion. Must be called inside a tokio
/// runtime.
pub async fn drain_concurrent(
    reader: &KkvReader,
    segments: &SegmentSet,
    request: &SearchRequest,
    rows: usize,
) -> CoreResult<Vec<ValueEntry>> {
    let mut iter = KkvIterator::Concurrent(reader.search_concurrent(segments, request));
    Ok(drain_iter(&mut iter, rows).await?.rows)
}

/// A built segment sealed into a temporary directory.
pub struct DiskSegment {
    /// The reopened segment.
    pub segment: Arc<BuiltSegment>,
    /// The segment directory.
    pub path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl DiskSegment {
    /// Seals a segment into a fresh temporary directory and reopens it.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created or the segment cannot be
    /// written or reopened.
    pub fn create(config: SegmentConfig, write: impl FnOnce(&mut BuiltSegmentWriter)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(format!("segment_{}", config.id.as_u64()));

        let mut writer = BuiltSegmentWriter::new(config);
        write(&mut writer);
        writer.finish_to_dir(&path).expect("Failed to write segment");

        let segment = BuiltSegment::open_dir(&path).expect("Failed to reopen segment");
        Self {
            segment: Arc::new(segment),
            path,
            _temp_dir: temp_dir,
        }
    }
}
