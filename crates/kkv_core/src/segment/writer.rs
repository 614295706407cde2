//! Writer that seals pkey groups into a built segment.

use super::building::BuildingSegment;
use super::built::{BuiltSegment, DATA_FILE_NAME, VALUE_FILE_NAME};
use super::format::{
    compute_crc32, encode_key_table, EntryCodec, EntryFormat, KeyTableEntry, SegmentFooter,
    ValuePart, CHUNK_HEADER_SIZE, CHUNK_TRAILER_SIZE,
};
use super::group::PKeyGroup;
use crate::config::{SegmentConfig, ValueLength};
use crate::error::{CoreError, CoreResult};
use crate::types::{PKey, SKey, Timestamp};
use kkv_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Collects writes and encodes them as a built segment.
#[derive(Debug)]
pub struct BuiltSegmentWriter {
    config: SegmentConfig,
    groups: BTreeMap<PKey, PKeyGroup>,
}

impl BuiltSegmentWriter {
    /// Creates a writer for a segment with the given configuration.
    pub fn new(config: SegmentConfig) -> Self {
        Self {
            config,
            groups: BTreeMap::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Returns the number of pkeys written so far.
    pub fn pkey_count(&self) -> usize {
        self.groups.len()
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns `ValueLengthMismatch` if the layout has a fixed length that
    /// `value` does not match.
    pub fn put(
        &mut self,
        pkey: PKey,
        skey: SKey,
        value: impl Into<Vec<u8>>,
        timestamp: Timestamp,
        expire_time: Option<Timestamp>,
    ) -> CoreResult<()> {
        let value = value.into();
        if let ValueLength::Fixed(len) = self.config.layout.length {
            if value.len() != len as usize {
                return Err(CoreError::ValueLengthMismatch {
                    expected: len as usize,
                    actual: value.len(),
                });
            }
        }
        self.groups
            .entry(pkey)
            .or_default()
            .put(skey, value, timestamp, expire_time);
        Ok(())
    }

    /// Deletes one skey.
    pub fn delete_skey(&mut self, pkey: PKey, skey: SKey, timestamp: Timestamp) {
        self.groups
            .entry(pkey)
            .or_default()
            .delete_skey(skey, timestamp);
    }

    /// Deletes a whole pkey.
    pub fn delete_pkey(&mut self, pkey: PKey, timestamp: Timestamp) {
        self.groups.entry(pkey).or_default().delete_pkey(timestamp);
    }

    /// Replays every group of a building segment into this writer.
    pub fn extend_from_building(&mut self, building: &BuildingSegment) -> CoreResult<()> {
        for (pkey, group) in building.snapshot() {
            if let Some(ts) = group.tombstone() {
                self.delete_pkey(pkey, ts);
            }
            for entry in group.entries() {
                if entry.deleted {
                    self.delete_skey(pkey, entry.skey, entry.timestamp);
                } else {
                    self.put(
                        pkey,
                        entry.skey,
                        entry.value.clone(),
                        entry.timestamp,
                        entry.expire_time,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Encodes the segment into empty stores.
    ///
    /// `values` is required for offset layouts and ignored otherwise.
    pub fn finish(
        self,
        data: &mut dyn StorageBackend,
        mut values: Option<&mut dyn StorageBackend>,
    ) -> CoreResult<SegmentFooter> {
        let config = self.config;
        let codec = EntryCodec::for_layout(config.layout);
        if codec.is_offset() && values.is_none() {
            return Err(CoreError::invalid_operation(
                "offset layout needs a value store",
            ));
        }
        if data.size()? != 0 {
            return Err(CoreError::invalid_operation(
                "segment data store is not empty",
            ));
        }

        let format = EntryFormat {
            codec,
            store_ts: config.store_ts,
            store_expire_time: config.store_expire_time,
            default_timestamp: config.default_timestamp,
        };
        let chunk_size = config.chunk_size.max(1);

        let mut chunks = ChunkSink::new(&mut *data, chunk_size);
        let mut keys = Vec::with_capacity(self.groups.len());
        let mut max_timestamp = 0;

        for (pkey, group) in &self.groups {
            let entries = if config.skey_sorted {
                group.sorted_entries()
            } else {
                group.entries().iter().collect()
            };
            if entries.is_empty() && !group.has_tombstone() {
                continue;
            }
            if !entries.is_empty() {
                chunks.flush_if_full()?;
            }

            let position = KeyTableEntry {
                pkey: *pkey,
                chunk_offset: chunks.chunk_offset,
                in_chunk: chunks.payload_len()?,
                entry_count: u32::try_from(entries.len())
                    .map_err(|_| CoreError::invalid_operation("too many entries for one pkey"))?,
                tombstone: group.tombstone(),
            };

            for entry in entries {
                chunks.flush_if_full()?;
                let value = if entry.deleted {
                    None
                } else if codec.is_offset() {
                    let store = values.as_deref_mut().ok_or_else(|| {
                        CoreError::invalid_operation("offset layout needs a value store")
                    })?;
                    let len = u32::try_from(entry.value.len())
                        .map_err(|_| CoreError::invalid_operation("value exceeds 4 GiB"))?;
                    let offset = append_value(store, codec, &entry.value)?;
                    Some(ValuePart::Offset { offset, len })
                } else {
                    Some(ValuePart::Inline(entry.value.as_slice()))
                };
                let timestamp = if config.store_ts {
                    entry.timestamp
                } else {
                    config.default_timestamp
                };
                max_timestamp = max_timestamp.max(timestamp);
                format.encode(
                    &mut chunks.payload,
                    entry.skey,
                    entry.timestamp,
                    entry.expire_time,
                    value,
                )?;
            }
            if let Some(ts) = group.tombstone() {
                max_timestamp = max_timestamp.max(ts);
            }
            keys.push(position);
        }
        chunks.flush()?;
        let key_table_offset = chunks.chunk_offset;

        data.append(&encode_key_table(&keys))?;
        let footer = SegmentFooter {
            segment_id: config.id,
            layout: config.layout,
            store_ts: config.store_ts,
            store_expire_time: config.store_expire_time,
            skey_sorted: config.skey_sorted,
            realtime: config.realtime,
            max_timestamp,
            default_timestamp: config.default_timestamp,
            locator: config.locator,
            key_table_offset,
            key_count: u32::try_from(keys.len())
                .map_err(|_| CoreError::invalid_operation("too many pkeys for one segment"))?,
        };
        data.append(&footer.encode())?;
        data.flush()?;
        data.sync()?;
        if let Some(values) = values {
            values.flush()?;
            values.sync()?;
        }

        debug!(
            segment = %footer.segment_id,
            keys = footer.key_count,
            bytes = data.size()?,
            "sealed built segment"
        );
        Ok(footer)
    }

    /// Encodes the segment into memory and opens it.
    pub fn finish_in_memory(self) -> CoreResult<BuiltSegment> {
        let mut data = InMemoryBackend::new();
        let mut values = InMemoryBackend::new();
        let offset = self.config.layout.is_offset();
        self.finish(&mut data, Some(&mut values))?;

        let values: Option<Arc<dyn StorageBackend>> = if offset {
            Some(Arc::new(values))
        } else {
            None
        };
        BuiltSegment::open(Arc::new(data), values)
    }

    /// Encodes the segment into a new directory.
    pub fn finish_to_dir(self, dir: &Path) -> CoreResult<SegmentFooter> {
        let mut data = FileBackend::create(&dir.join(DATA_FILE_NAME))?;
        if self.config.layout.is_offset() {
            let mut values = FileBackend::create(&dir.join(VALUE_FILE_NAME))?;
            self.finish(&mut data, Some(&mut values))
        } else {
            self.finish(&mut data, None)
        }
    }
}

/// Appends a value to the value store and returns its offset.
fn append_value(
    store: &mut dyn StorageBackend,
    codec: EntryCodec,
    value: &[u8],
) -> CoreResult<u64> {
    match codec {
        EntryCodec::OffsetVariable => {
            let len = u32::try_from(value.len())
                .map_err(|_| CoreError::invalid_operation("value exceeds 4 GiB"))?;
            let mut buf = Vec::with_capacity(4 + value.len());
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(value);
            Ok(store.append(&buf)?)
        }
        _ => {
            // Empty appends do not move the store; keep offsets distinct.
            let offset = store.size()?;
            store.append(value)?;
            Ok(offset)
        }
    }
}

/// Accumulates entry bytes and emits checksummed chunks.
struct ChunkSink<'a> {
    data: &'a mut dyn StorageBackend,
    payload: Vec<u8>,
    chunk_offset: u64,
    chunk_size: usize,
}

impl<'a> ChunkSink<'a> {
    fn new(data: &'a mut dyn StorageBackend, chunk_size: usize) -> Self {
        Self {
            data,
            payload: Vec::with_capacity(chunk_size),
            chunk_offset: 0,
            chunk_size,
        }
    }

    fn payload_len(&self) -> CoreResult<u32> {
        u32::try_from(self.payload.len())
            .map_err(|_| CoreError::invalid_operation("chunk exceeds 4 GiB"))
    }

    fn flush_if_full(&mut self) -> CoreResult<()> {
        if self.payload.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> CoreResult<()> {
        if self.payload.is_empty() {
            return Ok(());
        }
        let len = self.payload_len()?;
        let mut chunk = Vec::with_capacity(CHUNK_HEADER_SIZE + self.payload.len() + CHUNK_TRAILER_SIZE);
        chunk.extend_from_slice(&len.to_le_bytes());
        chunk.extend_from_slice(&self.payload);
        chunk.extend_from_slice(&compute_crc32(&self.payload).to_le_bytes());
        self.data.append(&chunk)?;
        self.chunk_offset += chunk.len() as u64;
        self.payload.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueLayout;
    use crate::types::SegmentId;

    #[test]
    fn fixed_layout_rejects_wrong_length() {
        let mut writer = BuiltSegmentWriter::new(
            SegmentConfig::new(SegmentId::new(1)).layout(ValueLayout::inline_fixed(4)),
        );
        let err = writer
            .put(PKey::new(1), SKey::new(1), b"abc".to_vec(), 1, None)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ValueLengthMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(writer
            .put(PKey::new(1), SKey::new(1), b"abcd".to_vec(), 1, None)
            .is_ok());
    }

    #[test]
    fn offset_layout_needs_value_store() {
        let writer = BuiltSegmentWriter::new(
            SegmentConfig::new(SegmentId::new(1)).layout(ValueLayout::offset_variable()),
        );
        let mut data = InMemoryBackend::new();
        assert!(matches!(
            writer.finish(&mut data, None),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn data_store_must_be_empty() {
        let writer = BuiltSegmentWriter::new(SegmentConfig::new(SegmentId::new(1)));
        let mut data = InMemoryBackend::from_bytes(vec![1, 2, 3]);
        assert!(writer.finish(&mut data, None).is_err());
    }

    #[test]
    fn empty_segment() {
        let segment = BuiltSegmentWriter::new(SegmentConfig::new(SegmentId::new(2)))
            .finish_in_memory()
            .unwrap();
        assert_eq!(segment.key_count(), 0);
        assert_eq!(segment.verify().unwrap(), 0);
    }

    #[test]
    fn pkeys_span_chunks() {
        let mut writer =
            BuiltSegmentWriter::new(SegmentConfig::new(SegmentId::new(1)).chunk_size(32));
        for skey in 0..20 {
            writer
                .put(PKey::new(1), SKey::new(skey), vec![skey as u8; 8], 10, None)
                .unwrap();
        }
        let segment = writer.finish_in_memory().unwrap();
        assert!(segment.verify().unwrap() > 1);
        assert_eq!(segment.lookup(PKey::new(1)).unwrap().entry_count, 20);
    }

    #[test]
    fn max_timestamp_without_stored_ts() {
        let mut writer = BuiltSegmentWriter::new(
            SegmentConfig::new(SegmentId::new(1))
                .store_ts(false)
                .default_timestamp(50),
        );
        writer
            .put(PKey::new(1), SKey::new(1), b"v".to_vec(), 900, None)
            .unwrap();
        let segment = writer.finish_in_memory().unwrap();
        assert_eq!(segment.max_timestamp(), 50);
    }

    #[test]
    fn extend_from_building_copies_tombstones() {
        let building = BuildingSegment::new(SegmentId::new(9));
        building.put(PKey::new(1), SKey::new(1), b"v".to_vec(), 10, Some(99));
        building.delete_skey(PKey::new(1), SKey::new(2), 11);
        building.delete_pkey(PKey::new(2), 12);

        let mut writer = BuiltSegmentWriter::new(
            SegmentConfig::new(SegmentId::new(1)).store_expire_time(true),
        );
        writer.extend_from_building(&building).unwrap();
        assert_eq!(writer.pkey_count(), 2);

        let segment = writer.finish_in_memory().unwrap();
        assert_eq!(segment.lookup(PKey::new(1)).unwrap().entry_count, 2);
        assert_eq!(segment.lookup(PKey::new(2)).unwrap().tombstone, Some(12));
        assert_eq!(segment.max_timestamp(), 12);
    }
}
