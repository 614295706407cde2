//! Immutable on-disk segment.

use super::format::{
    decode_key_table, verify_crc32, EntryFormat, KeyTableEntry, SegmentFooter, CHUNK_HEADER_SIZE,
    CHUNK_TRAILER_SIZE, FOOTER_SIZE, KEY_ENTRY_SIZE,
};
use crate::config::ValueLayout;
use crate::error::{CoreError, CoreResult};
use crate::stats::{SegmentStats, SegmentStatsSnapshot};
use crate::types::{Locator, PKey, SegmentId, Timestamp};
use crate::value::ValueArea;
use kkv_storage::{FileBackend, StorageBackend};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// File name of the data store inside a segment directory.
pub const DATA_FILE_NAME: &str = "data.kkv";

/// File name of the value store inside a segment directory.
pub const VALUE_FILE_NAME: &str = "values.kkv";

/// A decoded chunk payload.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub payload: Vec<u8>,
    /// Offset of the chunk that follows this one.
    pub next_offset: u64,
}

/// A sealed segment.
///
/// The key table is held in memory; chunks and values are read on demand.
pub struct BuiltSegment {
    footer: SegmentFooter,
    format: EntryFormat,
    data: Arc<dyn StorageBackend>,
    values: Option<Arc<ValueArea>>,
    keys: Vec<KeyTableEntry>,
    stats: Arc<SegmentStats>,
}

impl BuiltSegment {
    /// Opens a segment from its data store and, for offset layouts, its
    /// value store.
    pub fn open(
        data: Arc<dyn StorageBackend>,
        values: Option<Arc<dyn StorageBackend>>,
    ) -> CoreResult<Self> {
        let size = data.size()?;
        if size < FOOTER_SIZE as u64 {
            return Err(CoreError::invalid_format(format!(
                "segment of {size} bytes is shorter than its footer"
            )));
        }
        let footer = SegmentFooter::decode(&data.read_at(size - FOOTER_SIZE as u64, FOOTER_SIZE)?)?;

        let table_len = footer.key_count as u64 * KEY_ENTRY_SIZE as u64 + 4;
        if footer.key_table_offset.checked_add(table_len) != Some(size - FOOTER_SIZE as u64) {
            return Err(CoreError::segment_corruption(format!(
                "key table at {} with {} rows does not end at the footer",
                footer.key_table_offset, footer.key_count
            )));
        }
        let table = data.read_at(footer.key_table_offset, table_len as usize)?;
        let keys = decode_key_table(&table, footer.key_count)?;

        let stats = Arc::new(SegmentStats::new());
        let values = match (footer.layout.is_offset(), values) {
            (true, Some(backend)) => Some(Arc::new(ValueArea::new(
                backend,
                footer.layout.length,
                Arc::clone(&stats),
            ))),
            (true, None) => {
                return Err(CoreError::invalid_operation(
                    "segment stores values by offset but no value store was supplied",
                ))
            }
            (false, _) => None,
        };

        debug!(
            segment = %footer.segment_id,
            keys = footer.key_count,
            layout = ?footer.layout,
            "opened built segment"
        );

        Ok(Self {
            format: EntryFormat::from_footer(&footer),
            footer,
            data,
            values,
            keys,
            stats,
        })
    }

    /// Opens a segment directory written by `BuiltSegmentWriter::finish_to_dir`.
    pub fn open_dir(dir: &Path) -> CoreResult<Self> {
        let data = FileBackend::open_existing(&dir.join(DATA_FILE_NAME))?;
        let value_path = dir.join(VALUE_FILE_NAME);
        let values: Option<Arc<dyn StorageBackend>> = if value_path.exists() {
            Some(Arc::new(FileBackend::open_existing(&value_path)?))
        } else {
            None
        };
        Self::open(Arc::new(data), values)
    }

    /// Returns the segment id.
    pub fn id(&self) -> SegmentId {
        self.footer.segment_id
    }

    /// Returns the footer.
    pub fn footer(&self) -> &SegmentFooter {
        &self.footer
    }

    /// Returns the value layout.
    pub fn layout(&self) -> ValueLayout {
        self.footer.layout
    }

    /// Returns true if entries of a pkey are in ascending skey order.
    pub fn is_skey_sorted(&self) -> bool {
        self.footer.skey_sorted
    }

    /// Returns true if the segment came from realtime ingestion.
    pub fn is_realtime(&self) -> bool {
        self.footer.realtime
    }

    /// Returns the newest timestamp in the segment.
    pub fn max_timestamp(&self) -> Timestamp {
        self.footer.max_timestamp
    }

    /// Returns the source locator.
    pub fn locator(&self) -> Option<Locator> {
        self.footer.locator
    }

    /// Returns the number of pkeys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Returns the key table rows in pkey order.
    pub fn keys(&self) -> &[KeyTableEntry] {
        &self.keys
    }

    /// Returns a snapshot of the I/O counters.
    pub fn stats(&self) -> SegmentStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns true if the watermark has moved past this segment's locator.
    ///
    /// Segments without a locator are never obsolete.
    pub fn is_obsolete(&self, watermark: Option<&Locator>) -> bool {
        match (watermark, self.footer.locator.as_ref()) {
            (Some(watermark), Some(locator)) => watermark.covers(locator),
            _ => false,
        }
    }

    /// Finds the key table row of `pkey`. Performs no I/O.
    pub fn lookup(&self, pkey: PKey) -> Option<KeyTableEntry> {
        self.stats.record_lookup();
        self.keys
            .binary_search_by_key(&pkey, |key| key.pkey)
            .ok()
            .map(|index| self.keys[index])
    }

    pub(crate) fn format(&self) -> &EntryFormat {
        &self.format
    }

    pub(crate) fn value_area(&self) -> Option<&Arc<ValueArea>> {
        self.values.as_ref()
    }

    /// Reads and checks the chunk starting at `offset`.
    ///
    /// A chunk that does not fit inside the chunk area is corruption.
    pub(crate) fn read_chunk(&self, offset: u64) -> CoreResult<Chunk> {
        let end = self.footer.key_table_offset;
        let payload_offset = offset
            .checked_add(CHUNK_HEADER_SIZE as u64)
            .filter(|&payload_offset| payload_offset <= end)
            .ok_or_else(|| {
                CoreError::segment_corruption(format!(
                    "chunk offset {offset} outside the chunk area of {end} bytes"
                ))
            })?;
        let header = self.data.read_at(offset, CHUNK_HEADER_SIZE)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;

        let next_offset = payload_offset
            .checked_add((len + CHUNK_TRAILER_SIZE) as u64)
            .filter(|&next_offset| next_offset <= end)
            .ok_or_else(|| {
                CoreError::segment_corruption(format!(
                    "chunk at {offset} of {len} bytes overruns the chunk area"
                ))
            })?;

        let mut payload = self.data.read_at(payload_offset, len + CHUNK_TRAILER_SIZE)?;
        let crc = payload.split_off(len);
        verify_crc32(&payload, u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]))?;

        self.stats.record_chunk_read(len as u64);
        trace!(segment = %self.footer.segment_id, offset, len, "read chunk");
        Ok(Chunk {
            payload,
            next_offset,
        })
    }

    /// Reads a chunk on the blocking pool.
    pub(crate) async fn read_chunk_async(self: &Arc<Self>, offset: u64) -> CoreResult<Chunk> {
        let segment = Arc::clone(self);
        tokio::task::spawn_blocking(move || segment.read_chunk(offset)).await?
    }

    /// Reads every chunk and checks its checksum.
    ///
    /// Returns the number of chunks.
    pub fn verify(&self) -> CoreResult<usize> {
        let mut offset = 0;
        let mut chunks = 0;
        while offset < self.footer.key_table_offset {
            offset = self.read_chunk(offset)?.next_offset;
            chunks += 1;
        }
        Ok(chunks)
    }
}

impl fmt::Debug for BuiltSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltSegment")
            .field("footer", &self.footer)
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}
