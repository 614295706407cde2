//! Built-segment on-disk format.
//!
//! ## Data store
//!
//! ```text
//! | chunk | chunk | ... | key table | key table crc (4) | footer (63) |
//! ```
//!
//! ## Chunk
//!
//! ```text
//! | payload_len (4) | payload (N) | crc32 (4) |
//! ```
//!
//! ## Entry (inside a chunk payload)
//!
//! ```text
//! | skey (8) | flags (1) | [ts (8)] | [expire (8)] | value part |
//! ```
//!
//! Flags:
//! - `0x01` = skey tombstone (no value part)
//!
//! Value part by layout:
//! - inline fixed: `bytes (n)`
//! - inline variable: `len (4) | bytes (len)`
//! - offset fixed: `offset (8)`
//! - offset variable: `offset (8) | len (4)`, the value store holding
//!   `len (4) | bytes (len)` at `offset`
//!
//! ## Key table row
//!
//! ```text
//! | pkey (8) | chunk_offset (8) | in_chunk (4) | entry_count (4) | tombstone_ts (8) | flags (1) |
//! ```
//!
//! ## Footer
//!
//! ```text
//! | magic (4) | version (2) | flags (1) | fixed_value_len (4) | segment_id (8) |
//! | max_ts (8) | default_ts (8) | locator_source (4) | locator_offset (8) |
//! | key_table_offset (8) | key_count (4) | crc32 (4) |
//! ```

use crate::config::{ValueLayout, ValueLength, ValuePlacement};
use crate::error::{CoreError, CoreResult};
use crate::types::{Locator, PKey, SKey, SegmentId, Timestamp};

/// Magic bytes at the start of the footer.
pub const SEGMENT_MAGIC: [u8; 4] = *b"KKVS";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Size of the footer in bytes.
pub const FOOTER_SIZE: usize = 63;

/// Size of one key table row in bytes.
pub const KEY_ENTRY_SIZE: usize = 33;

/// Bytes before a chunk payload.
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Bytes after a chunk payload.
pub const CHUNK_TRAILER_SIZE: usize = 4;

/// Stored expire time meaning "none".
pub const EXPIRE_UNSET: u64 = u64::MAX;

const ENTRY_FLAG_DELETED: u8 = 0x01;
const KEY_FLAG_TOMBSTONE: u8 = 0x01;

const FOOTER_FLAG_OFFSET: u8 = 0x01;
const FOOTER_FLAG_VARIABLE: u8 = 0x02;
const FOOTER_FLAG_STORE_TS: u8 = 0x04;
const FOOTER_FLAG_STORE_EXPIRE: u8 = 0x08;
const FOOTER_FLAG_SKEY_SORTED: u8 = 0x10;
const FOOTER_FLAG_REALTIME: u8 = 0x20;
const FOOTER_FLAG_HAS_LOCATOR: u8 = 0x40;

/// Bounds-checked reader over a byte slice.
#[derive(Debug)]
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                CoreError::segment_corruption(format!(
                    "read of {len} bytes at {} overruns {} byte buffer",
                    self.pos,
                    self.data.len()
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> CoreResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> CoreResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> CoreResult<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Checks `data` against a stored checksum.
pub(crate) fn verify_crc32(data: &[u8], expected: u32) -> CoreResult<()> {
    let actual = compute_crc32(data);
    if actual != expected {
        tracing::warn!(expected, actual, "checksum mismatch");
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Trailing metadata of a built segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFooter {
    /// Recency index.
    pub segment_id: SegmentId,
    /// Value layout.
    pub layout: ValueLayout,
    /// Whether entries store timestamps.
    pub store_ts: bool,
    /// Whether entries store expire times.
    pub store_expire_time: bool,
    /// Whether entries of a pkey are in ascending skey order.
    pub skey_sorted: bool,
    /// Whether the segment came from realtime ingestion.
    pub realtime: bool,
    /// Newest timestamp in the segment, tombstones included.
    pub max_timestamp: Timestamp,
    /// Timestamp of every entry when timestamps are not stored.
    pub default_timestamp: Timestamp,
    /// Progress of the source the segment was built from.
    pub locator: Option<Locator>,
    /// Offset of the key table in the data store.
    pub key_table_offset: u64,
    /// Number of key table rows.
    pub key_count: u32,
}

impl SegmentFooter {
    /// Encodes the footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);

        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());

        let mut flags = 0u8;
        if self.layout.is_offset() {
            flags |= FOOTER_FLAG_OFFSET;
        }
        if self.layout.fixed_len().is_none() {
            flags |= FOOTER_FLAG_VARIABLE;
        }
        if self.store_ts {
            flags |= FOOTER_FLAG_STORE_TS;
        }
        if self.store_expire_time {
            flags |= FOOTER_FLAG_STORE_EXPIRE;
        }
        if self.skey_sorted {
            flags |= FOOTER_FLAG_SKEY_SORTED;
        }
        if self.realtime {
            flags |= FOOTER_FLAG_REALTIME;
        }
        if self.locator.is_some() {
            flags |= FOOTER_FLAG_HAS_LOCATOR;
        }
        buf.push(flags);

        buf.extend_from_slice(&self.layout.fixed_len().unwrap_or(0).to_le_bytes());
        buf.extend_from_slice(&self.segment_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.max_timestamp.to_le_bytes());
        buf.extend_from_slice(&self.default_timestamp.to_le_bytes());

        let locator = self.locator.unwrap_or(Locator::new(0, 0));
        buf.extend_from_slice(&locator.source.to_le_bytes());
        buf.extend_from_slice(&locator.offset.to_le_bytes());

        buf.extend_from_slice(&self.key_table_offset.to_le_bytes());
        buf.extend_from_slice(&self.key_count.to_le_bytes());

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes a footer from exactly [`FOOTER_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() != FOOTER_SIZE {
            return Err(CoreError::invalid_format(format!(
                "footer must be {FOOTER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        if data[0..4] != SEGMENT_MAGIC {
            return Err(CoreError::invalid_format("invalid segment magic"));
        }

        let body = &data[..FOOTER_SIZE - 4];
        let stored_crc = u32::from_le_bytes([
            data[FOOTER_SIZE - 4],
            data[FOOTER_SIZE - 3],
            data[FOOTER_SIZE - 2],
            data[FOOTER_SIZE - 1],
        ]);
        verify_crc32(body, stored_crc)?;

        let mut cursor = ByteCursor::at(body, 4);
        let version = cursor.u16()?;
        if version > SEGMENT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported segment version: {version}"
            )));
        }

        let flags = cursor.u8()?;
        let fixed_len = cursor.u32()?;
        let placement = if flags & FOOTER_FLAG_OFFSET != 0 {
            ValuePlacement::Offset
        } else {
            ValuePlacement::Inline
        };
        let length = if flags & FOOTER_FLAG_VARIABLE != 0 {
            ValueLength::Variable
        } else {
            ValueLength::Fixed(fixed_len)
        };

        let segment_id = SegmentId::new(cursor.u64()?);
        let max_timestamp = cursor.u64()?;
        let default_timestamp = cursor.u64()?;
        let locator = Locator::new(cursor.u32()?, cursor.u64()?);
        let key_table_offset = cursor.u64()?;
        let key_count = cursor.u32()?;

        Ok(Self {
            segment_id,
            layout: ValueLayout::new(placement, length),
            store_ts: flags & FOOTER_FLAG_STORE_TS != 0,
            store_expire_time: flags & FOOTER_FLAG_STORE_EXPIRE != 0,
            skey_sorted: flags & FOOTER_FLAG_SKEY_SORTED != 0,
            realtime: flags & FOOTER_FLAG_REALTIME != 0,
            max_timestamp,
            default_timestamp,
            locator: (flags & FOOTER_FLAG_HAS_LOCATOR != 0).then_some(locator),
            key_table_offset,
            key_count,
        })
    }
}

/// Key table row: where the entries of one pkey start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTableEntry {
    /// The pkey.
    pub pkey: PKey,
    /// Offset of the chunk holding the first entry.
    pub chunk_offset: u64,
    /// Offset of the first entry inside that chunk's payload.
    pub in_chunk: u32,
    /// Number of entries, possibly spanning following chunks.
    pub entry_count: u32,
    /// Timestamp of the pkey tombstone, if the pkey was deleted.
    pub tombstone: Option<Timestamp>,
}

impl KeyTableEntry {
    /// Returns true if the pkey was deleted in this segment.
    pub fn has_pkey_tombstone(&self) -> bool {
        self.tombstone.is_some()
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.pkey.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.chunk_offset.to_le_bytes());
        buf.extend_from_slice(&self.in_chunk.to_le_bytes());
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.tombstone.unwrap_or(0).to_le_bytes());
        buf.push(if self.tombstone.is_some() {
            KEY_FLAG_TOMBSTONE
        } else {
            0
        });
    }

    pub(crate) fn decode(cursor: &mut ByteCursor<'_>) -> CoreResult<Self> {
        let pkey = PKey::new(cursor.u64()?);
        let chunk_offset = cursor.u64()?;
        let in_chunk = cursor.u32()?;
        let entry_count = cursor.u32()?;
        let tombstone_ts = cursor.u64()?;
        let flags = cursor.u8()?;
        Ok(Self {
            pkey,
            chunk_offset,
            in_chunk,
            entry_count,
            tombstone: (flags & KEY_FLAG_TOMBSTONE != 0).then_some(tombstone_ts),
        })
    }
}

/// Encodes a key table with its trailing checksum.
pub(crate) fn encode_key_table(keys: &[KeyTableEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keys.len() * KEY_ENTRY_SIZE + 4);
    for key in keys {
        key.encode_into(&mut buf);
    }
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes a checksummed key table and checks that pkeys are strictly ascending.
pub(crate) fn decode_key_table(data: &[u8], count: u32) -> CoreResult<Vec<KeyTableEntry>> {
    let body_len = count as usize * KEY_ENTRY_SIZE;
    if data.len() != body_len + 4 {
        return Err(CoreError::segment_corruption(format!(
            "key table of {count} rows must be {} bytes, got {}",
            body_len + 4,
            data.len()
        )));
    }
    let (body, crc) = data.split_at(body_len);
    verify_crc32(body, u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]))?;

    let mut cursor = ByteCursor::new(body);
    let mut keys: Vec<KeyTableEntry> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = KeyTableEntry::decode(&mut cursor)?;
        if keys.last().is_some_and(|prev| prev.pkey >= key.pkey) {
            return Err(CoreError::segment_corruption(format!(
                "key table not sorted at {}",
                key.pkey
            )));
        }
        keys.push(key);
    }
    Ok(keys)
}

/// Value part codec, chosen once per segment from its layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCodec {
    /// `n` value bytes in the entry.
    InlineFixed(u32),
    /// `len u32 | bytes` in the entry.
    InlineVariable,
    /// `offset u64` into a value store of `n` byte values.
    OffsetFixed(u32),
    /// `offset u64 | len u32` into a value store of length-prefixed values.
    OffsetVariable,
}

impl EntryCodec {
    /// Picks the codec for a layout.
    pub fn for_layout(layout: ValueLayout) -> Self {
        match (layout.placement, layout.length) {
            (ValuePlacement::Inline, ValueLength::Fixed(len)) => Self::InlineFixed(len),
            (ValuePlacement::Inline, ValueLength::Variable) => Self::InlineVariable,
            (ValuePlacement::Offset, ValueLength::Fixed(len)) => Self::OffsetFixed(len),
            (ValuePlacement::Offset, ValueLength::Variable) => Self::OffsetVariable,
        }
    }

    /// Returns true if values live in the value store.
    pub fn is_offset(self) -> bool {
        matches!(self, Self::OffsetFixed(_) | Self::OffsetVariable)
    }
}

/// Value part of an encoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValuePart<'a> {
    Inline(&'a [u8]),
    Offset { offset: u64, len: u32 },
}

/// Value part of a decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodedValue {
    Inline(Vec<u8>),
    /// Location and length of a value in the value store.
    Offset { offset: u64, len: u32 },
    Absent,
}

/// An entry decoded from a chunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedEntry {
    pub skey: SKey,
    pub deleted: bool,
    pub timestamp: Timestamp,
    pub expire_time: Option<Timestamp>,
    pub value: DecodedValue,
}

/// Entry encoding of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryFormat {
    pub codec: EntryCodec,
    pub store_ts: bool,
    pub store_expire_time: bool,
    pub default_timestamp: Timestamp,
}

impl EntryFormat {
    pub(crate) fn from_footer(footer: &SegmentFooter) -> Self {
        Self {
            codec: EntryCodec::for_layout(footer.layout),
            store_ts: footer.store_ts,
            store_expire_time: footer.store_expire_time,
            default_timestamp: footer.default_timestamp,
        }
    }

    /// Appends one entry. `value` is `None` for skey tombstones.
    pub(crate) fn encode(
        &self,
        buf: &mut Vec<u8>,
        skey: SKey,
        timestamp: Timestamp,
        expire_time: Option<Timestamp>,
        value: Option<ValuePart<'_>>,
    ) -> CoreResult<()> {
        buf.extend_from_slice(&skey.as_u64().to_le_bytes());
        buf.push(if value.is_none() { ENTRY_FLAG_DELETED } else { 0 });
        if self.store_ts {
            buf.extend_from_slice(&timestamp.to_le_bytes());
        }
        if self.store_expire_time {
            buf.extend_from_slice(&expire_time.unwrap_or(EXPIRE_UNSET).to_le_bytes());
        }

        match (self.codec, value) {
            (_, None) => {}
            (EntryCodec::InlineFixed(len), Some(ValuePart::Inline(bytes))) => {
                if bytes.len() != len as usize {
                    return Err(CoreError::ValueLengthMismatch {
                        expected: len as usize,
                        actual: bytes.len(),
                    });
                }
                buf.extend_from_slice(bytes);
            }
            (EntryCodec::InlineVariable, Some(ValuePart::Inline(bytes))) => {
                let len = u32::try_from(bytes.len())
                    .map_err(|_| CoreError::invalid_operation("value exceeds 4 GiB"))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            (EntryCodec::OffsetFixed(fixed), Some(ValuePart::Offset { offset, len })) => {
                if len != fixed {
                    return Err(CoreError::ValueLengthMismatch {
                        expected: fixed as usize,
                        actual: len as usize,
                    });
                }
                buf.extend_from_slice(&offset.to_le_bytes());
            }
            (EntryCodec::OffsetVariable, Some(ValuePart::Offset { offset, len })) => {
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
            }
            (codec, Some(_)) => {
                return Err(CoreError::invalid_operation(format!(
                    "value part does not match codec {codec:?}"
                )));
            }
        }
        Ok(())
    }

    /// Decodes one entry at the cursor.
    pub(crate) fn decode(&self, cursor: &mut ByteCursor<'_>) -> CoreResult<DecodedEntry> {
        let skey = SKey::new(cursor.u64()?);
        let flags = cursor.u8()?;
        if flags & !ENTRY_FLAG_DELETED != 0 {
            return Err(CoreError::segment_corruption(format!(
                "unknown entry flags {flags:#04x} at {}",
                cursor.position()
            )));
        }
        let deleted = flags & ENTRY_FLAG_DELETED != 0;
        let timestamp = if self.store_ts {
            cursor.u64()?
        } else {
            self.default_timestamp
        };
        let expire_time = if self.store_expire_time {
            Some(cursor.u64()?).filter(|&expire| expire != EXPIRE_UNSET)
        } else {
            None
        };

        let value = if deleted {
            DecodedValue::Absent
        } else {
            match self.codec {
                EntryCodec::InlineFixed(len) => DecodedValue::Inline(cursor.bytes(len as usize)?.to_vec()),
                EntryCodec::InlineVariable => {
                    let len = cursor.u32()? as usize;
                    DecodedValue::Inline(cursor.bytes(len)?.to_vec())
                }
                EntryCodec::OffsetFixed(len) => DecodedValue::Offset {
                    offset: cursor.u64()?,
                    len,
                },
                EntryCodec::OffsetVariable => DecodedValue::Offset {
                    offset: cursor.u64()?,
                    len: cursor.u32()?,
                },
            }
        };

        Ok(DecodedEntry {
            skey,
            deleted,
            timestamp,
            expire_time,
            value,
        })
    }
}
