//! Bounded, resumable result buffer.
//!
//! A search fills one `ResultBuffer` per `batch_get` call. The buffer caps
//! the rows (and optionally bytes) of a batch and enforces the remaining
//! quota of the search. When an entry arrives while the buffer is full it
//! is parked in a one-row spill slot and becomes the first row of the next
//! batch, so a caller learns that more rows exist without an extra empty
//! round trip.

use crate::error::CoreResult;
use crate::value::{PendingValue, ValueArea, ValueEntry};
use std::sync::Arc;
use tracing::trace;

/// Coarse state of a buffer after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// No rows.
    Empty,
    /// Rows present, room for more.
    Accumulating,
    /// The row or byte limit was hit; more rows are waiting.
    Full,
    /// The search quota is used up.
    QuotaReached,
    /// The search has no more rows.
    Exhausted,
}

/// Buffer of result rows filled by a search.
#[derive(Debug)]
pub struct ResultBuffer {
    rows: Vec<ValueEntry>,
    pending: Vec<(usize, PendingValue)>,
    spill: Option<(ValueEntry, Option<PendingValue>)>,
    max_rows: usize,
    max_bytes: usize,
    bytes: usize,
    quota: usize,
    exhausted: bool,
    cursor: usize,
}

impl ResultBuffer {
    /// Creates a buffer that holds up to `max_rows` rows per batch.
    pub fn new(max_rows: usize) -> Self {
        let max_rows = max_rows.max(1);
        Self {
            rows: Vec::with_capacity(max_rows.min(1024)),
            pending: Vec::new(),
            spill: None,
            max_rows,
            max_bytes: usize::MAX,
            bytes: 0,
            quota: usize::MAX,
            exhausted: false,
            cursor: 0,
        }
    }

    /// Also caps a batch by the approximate memory its rows occupy.
    #[must_use]
    pub fn with_byte_limit(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    /// Returns the row limit.
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Returns true if the row or byte limit is reached.
    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_rows || self.bytes >= self.max_bytes
    }

    /// Returns true if the quota is used up.
    pub fn reach_limit(&self) -> bool {
        self.quota == 0
    }

    /// Returns the rows the search may still produce.
    pub fn remaining_quota(&self) -> usize {
        self.quota
    }

    /// Returns the number of rows, duplicates included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the buffer holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns every row, duplicates included, in emission order.
    pub fn entries(&self) -> &[ValueEntry] {
        &self.rows
    }

    /// Iterates over the non-duplicate rows.
    pub fn iter(&self) -> impl Iterator<Item = &ValueEntry> {
        self.rows.iter().filter(|entry| !entry.duplicate)
    }

    /// Returns the number of duplicate rows.
    pub fn duplicate_count(&self) -> usize {
        self.rows.iter().filter(|entry| entry.duplicate).count()
    }

    /// Returns the next non-duplicate row and moves the cursor past it.
    pub fn next_entry(&mut self) -> Option<&ValueEntry> {
        while self.cursor < self.rows.len() {
            let index = self.cursor;
            self.cursor += 1;
            if !self.rows[index].duplicate {
                return Some(&self.rows[index]);
            }
        }
        None
    }

    /// Moves the consumption cursor back to the first row.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Returns the coarse buffer state.
    pub fn state(&self) -> BufferState {
        if self.reach_limit() && self.spill.is_none() {
            BufferState::QuotaReached
        } else if self.exhausted {
            BufferState::Exhausted
        } else if self.spill.is_some() || self.is_full() {
            BufferState::Full
        } else if self.rows.is_empty() {
            BufferState::Empty
        } else {
            BufferState::Accumulating
        }
    }

    /// Takes the rows out of the buffer, leaving it empty.
    pub fn take_entries(&mut self) -> Vec<ValueEntry> {
        self.cursor = 0;
        self.bytes = 0;
        std::mem::take(&mut self.rows)
    }

    /// Starts a new batch.
    ///
    /// Rows of the previous batch are dropped. A parked spill row becomes
    /// the first row of the new batch; the quota is left as it is.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.pending.clear();
        self.bytes = 0;
        self.cursor = 0;
        self.exhausted = false;
        if let Some((entry, pending)) = self.spill.take() {
            self.push_row(entry, pending);
        }
    }

    /// Drops every row, the spill included. Used when a batch fails.
    pub(crate) fn discard(&mut self) {
        self.spill = None;
        self.clear();
    }

    pub(crate) fn set_quota(&mut self, quota: usize) {
        self.quota = quota;
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub(crate) fn has_spill(&self) -> bool {
        self.spill.is_some()
    }

    /// Returns true while the buffer takes more rows in this batch.
    pub(crate) fn can_accept(&self) -> bool {
        self.spill.is_none() && self.quota > 0
    }

    /// Appends a row. Non-duplicate rows count against the quota.
    ///
    /// A row arriving while the buffer is full goes to the spill slot.
    pub(crate) fn emplace_back(&mut self, entry: ValueEntry, pending: Option<PendingValue>) {
        debug_assert!(self.spill.is_none(), "emplace into a saturated buffer");
        if !entry.duplicate {
            self.quota = self.quota.saturating_sub(1);
        }
        if self.is_full() {
            self.spill = Some((entry, pending));
        } else {
            self.push_row(entry, pending);
        }
    }

    /// Offset values are charged at their recorded length before they are
    /// read, so every layout fills a batch to the same byte limit.
    fn push_row(&mut self, entry: ValueEntry, pending: Option<PendingValue>) {
        self.bytes += entry.footprint();
        if let Some(pending) = pending {
            self.bytes += pending.len;
            self.pending.push((self.rows.len(), pending));
        }
        self.rows.push(entry);
    }

    /// Reads every offset-placed value of the batch on the calling thread.
    pub(crate) fn resolve_values(&mut self) -> CoreResult<()> {
        for (area, slots) in group_pending(std::mem::take(&mut self.pending)) {
            let reads: Vec<(u64, usize)> = slots.iter().map(|&(_, read)| read).collect();
            let values = area.read_many(&reads)?;
            self.fill_values(&slots, values);
        }
        Ok(())
    }

    /// Reads every offset-placed value of the batch, one blocking task per
    /// value store.
    pub(crate) async fn resolve_values_async(&mut self) -> CoreResult<()> {
        let groups = group_pending(std::mem::take(&mut self.pending));
        let mut tasks = Vec::with_capacity(groups.len());
        for (area, slots) in groups {
            let reads: Vec<(u64, usize)> = slots.iter().map(|&(_, read)| read).collect();
            let task = tokio::task::spawn_blocking(move || area.read_many(&reads));
            tasks.push((slots, task));
        }
        for (slots, task) in tasks {
            let values = task.await??;
            self.fill_values(&slots, values);
        }
        Ok(())
    }

    fn fill_values(&mut self, slots: &[(usize, (u64, usize))], values: Vec<Vec<u8>>) {
        trace!(values = values.len(), "resolved offset values");
        for (&(row, _), value) in slots.iter().zip(values) {
            self.rows[row].value = value;
        }
    }
}

/// A value store and the `(row, (offset, len))` reads queued against it.
type PendingGroup = (Arc<ValueArea>, Vec<(usize, (u64, usize))>);

/// Groups pending reads by value store, keeping row order inside a group.
fn group_pending(pending: Vec<(usize, PendingValue)>) -> Vec<PendingGroup> {
    let mut groups: Vec<PendingGroup> = Vec::new();
    for (row, value) in pending {
        match groups
            .iter_mut()
            .find(|(area, _)| Arc::ptr_eq(area, &value.area))
        {
            Some((_, slots)) => slots.push((row, (value.offset, value.len))),
            None => groups.push((value.area, vec![(row, (value.offset, value.len))])),
        }
    }
    groups
}
