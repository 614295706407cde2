//! Iterator over the values of one pkey in a built segment.
//!
//! Decoding is separated from I/O: `step` works on the chunk already held
//! and reports when it needs the next one, so the blocking and the async
//! paths share one decoder and differ only in how the chunk is fetched.

use super::built::{BuiltSegment, Chunk};
use super::format::{ByteCursor, DecodedEntry, DecodedValue, KeyTableEntry};
use super::reader::DedupMode;
use crate::buffer::ResultBuffer;
use crate::error::{CoreError, CoreResult};
use crate::search::{Admission, Realm, SearchContext};
use crate::skey::SKeySearchContext;
use crate::types::{SKey, Timestamp};
use crate::value::{EntryMeta, RawEntry, StoredValue};
use std::sync::Arc;

/// Verdict of the skey filter on one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Take,
    Skip,
    /// No later entry can be wanted.
    Stop,
}

/// Wanted-skey filter applied while decoding.
#[derive(Debug, Clone)]
pub(crate) struct SKeyFilter {
    skeys: Arc<SKeySearchContext>,
    ordered: bool,
    next: usize,
}

impl SKeyFilter {
    /// `ordered` is set when the segment stores skeys ascending and the
    /// caller does not need segment order, which allows stopping past the
    /// largest wanted key.
    pub(crate) fn new(skeys: Arc<SKeySearchContext>, ordered: bool) -> Self {
        Self {
            skeys,
            ordered,
            next: 0,
        }
    }

    fn check(&mut self, skey: SKey) -> Verdict {
        if self.skeys.is_empty() {
            return Verdict::Take;
        }
        if !self.ordered {
            return if self.skeys.contains(skey) {
                Verdict::Take
            } else {
                Verdict::Skip
            };
        }
        if self.skeys.max_skey().is_some_and(|max| skey > max) {
            return Verdict::Stop;
        }
        let wanted = self.skeys.sorted_skeys();
        while self.next < wanted.len() && wanted[self.next] < skey {
            self.next += 1;
        }
        match wanted.get(self.next) {
            None => Verdict::Stop,
            Some(&next) if next == skey => Verdict::Take,
            Some(_) => Verdict::Skip,
        }
    }
}

enum Step {
    Entry(RawEntry),
    NeedChunk(u64),
    End,
}

/// Iterates the entries of a pkey inside a built segment.
#[derive(Debug)]
pub struct BuiltValueIterator {
    segment: Arc<BuiltSegment>,
    chunk: Option<Chunk>,
    cursor: usize,
    remaining: u32,
    current: Option<RawEntry>,
    filter: SKeyFilter,
    pkey_tombstone: bool,
    dedup: DedupMode,
}

impl BuiltValueIterator {
    fn positioned(
        segment: Arc<BuiltSegment>,
        position: &KeyTableEntry,
        filter: SKeyFilter,
        dedup: DedupMode,
    ) -> Self {
        Self {
            segment,
            chunk: None,
            cursor: 0,
            remaining: position.entry_count,
            current: None,
            filter,
            pkey_tombstone: position.has_pkey_tombstone(),
            dedup,
        }
    }

    /// Opens the iterator and positions it on the first wanted entry.
    pub(crate) fn open(
        segment: Arc<BuiltSegment>,
        position: KeyTableEntry,
        filter: SKeyFilter,
        dedup: DedupMode,
    ) -> CoreResult<Self> {
        let mut iter = Self::positioned(segment, &position, filter, dedup);
        if iter.remaining > 0 {
            let chunk = iter.segment.read_chunk(position.chunk_offset)?;
            iter.load(chunk, position.in_chunk as usize)?;
        }
        iter.advance()?;
        Ok(iter)
    }

    /// Async variant of [`open`](Self::open); chunk reads run on the blocking pool.
    pub(crate) async fn open_async(
        segment: Arc<BuiltSegment>,
        position: KeyTableEntry,
        filter: SKeyFilter,
        dedup: DedupMode,
    ) -> CoreResult<Self> {
        let mut iter = Self::positioned(segment, &position, filter, dedup);
        if iter.remaining > 0 {
            let chunk = iter.segment.read_chunk_async(position.chunk_offset).await?;
            iter.load(chunk, position.in_chunk as usize)?;
        }
        iter.advance_async().await?;
        Ok(iter)
    }

    fn load(&mut self, chunk: Chunk, cursor: usize) -> CoreResult<()> {
        if cursor > chunk.payload.len() {
            return Err(CoreError::segment_corruption(format!(
                "entry offset {cursor} beyond chunk of {} bytes",
                chunk.payload.len()
            )));
        }
        self.chunk = Some(chunk);
        self.cursor = cursor;
        Ok(())
    }

    fn step(&mut self) -> CoreResult<Step> {
        loop {
            if self.remaining == 0 {
                return Ok(Step::End);
            }
            let Some(chunk) = &self.chunk else {
                return Err(CoreError::segment_corruption("entries left but no chunk loaded"));
            };
            if self.cursor >= chunk.payload.len() {
                return Ok(Step::NeedChunk(chunk.next_offset));
            }

            let mut cursor = ByteCursor::at(&chunk.payload, self.cursor);
            let decoded = self.segment.format().decode(&mut cursor)?;
            self.cursor = cursor.position();
            self.remaining -= 1;

            match self.filter.check(decoded.skey) {
                Verdict::Take => return Ok(Step::Entry(self.raw_entry(decoded)?)),
                Verdict::Skip => continue,
                Verdict::Stop => {
                    self.remaining = 0;
                    return Ok(Step::End);
                }
            }
        }
    }

    fn raw_entry(&self, decoded: DecodedEntry) -> CoreResult<RawEntry> {
        let value = match decoded.value {
            DecodedValue::Inline(bytes) => StoredValue::Inline(bytes),
            DecodedValue::Offset { offset, len } => {
                let area = self.segment.value_area().ok_or_else(|| {
                    CoreError::segment_corruption("offset value in a segment without value store")
                })?;
                StoredValue::Offset {
                    area: Arc::clone(area),
                    offset,
                    len: len as usize,
                }
            }
            DecodedValue::Absent => StoredValue::Absent,
        };
        Ok(RawEntry {
            meta: EntryMeta {
                skey: decoded.skey,
                timestamp: decoded.timestamp,
                expire_time: decoded.expire_time,
                deleted: decoded.deleted,
            },
            value,
        })
    }

    /// Moves to the next wanted entry, reading chunks on the calling thread.
    pub fn advance(&mut self) -> CoreResult<()> {
        loop {
            match self.step()? {
                Step::Entry(entry) => {
                    self.current = Some(entry);
                    return Ok(());
                }
                Step::End => {
                    self.current = None;
                    return Ok(());
                }
                Step::NeedChunk(offset) => {
                    let chunk = self.segment.read_chunk(offset)?;
                    self.load(chunk, 0)?;
                }
            }
        }
    }

    /// Moves to the next wanted entry, reading chunks on the blocking pool.
    pub async fn advance_async(&mut self) -> CoreResult<()> {
        loop {
            match self.step()? {
                Step::Entry(entry) => {
                    self.current = Some(entry);
                    return Ok(());
                }
                Step::End => {
                    self.current = None;
                    return Ok(());
                }
                Step::NeedChunk(offset) => {
                    let chunk = self.segment.read_chunk_async(offset).await?;
                    self.load(chunk, 0)?;
                }
            }
        }
    }

    /// Returns true while positioned on an entry.
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Returns the current skey.
    pub fn skey(&self) -> Option<SKey> {
        self.current.as_ref().map(|entry| entry.meta.skey)
    }

    /// Returns the current timestamp.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.current.as_ref().map(|entry| entry.meta.timestamp)
    }

    /// Returns the current expire time.
    pub fn expire_time(&self) -> Option<Timestamp> {
        self.current.as_ref().and_then(|entry| entry.meta.expire_time)
    }

    /// Returns true if the current entry is a skey tombstone.
    pub fn is_deleted(&self) -> bool {
        self.current.as_ref().is_some_and(|entry| entry.meta.deleted)
    }

    /// Returns true if the pkey was deleted in this segment.
    pub fn has_pkey_tombstone(&self) -> bool {
        self.pkey_tombstone
    }

    /// Appends admitted entries until the buffer stops accepting or the
    /// pkey is done. Returns true once the pkey is exhausted.
    ///
    /// Offset values are appended unresolved; the buffer reads them after
    /// the scan.
    pub(crate) fn batch_get(
        &mut self,
        ctx: &mut SearchContext,
        buf: &mut ResultBuffer,
    ) -> CoreResult<bool> {
        while let Some(entry) = self.current.take() {
            if !buf.can_accept() || ctx.all_wanted_found() {
                self.current = Some(entry);
                return Ok(false);
            }
            if let Admission::Emit { duplicate } = ctx.admit(Realm::Built, entry.meta, self.dedup) {
                let (value, pending) = entry.into_value_entry(duplicate);
                buf.emplace_back(value, pending);
            }
            self.advance()?;
        }
        Ok(true)
    }

    /// Drains the remaining entries without admission.
    pub(crate) async fn collect_async(mut self) -> CoreResult<Vec<RawEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.current.take() {
            entries.push(entry);
            self.advance_async().await?;
        }
        Ok(entries)
    }
}
