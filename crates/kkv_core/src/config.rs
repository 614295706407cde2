//! Index and segment configuration.

use crate::types::{Locator, SegmentId, Timestamp};

/// How a search over segments is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Segments are visited one at a time on the caller's thread.
    #[default]
    Blocking,
    /// Built segments are read by spawned tasks; results merge in recency order.
    Concurrent,
}

/// Where a built segment keeps value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePlacement {
    /// Value bytes sit inside the entry.
    Inline,
    /// The entry holds an offset into a separate value store.
    Offset,
}

/// Whether values share one length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueLength {
    /// Every value is exactly this many bytes.
    Fixed(u32),
    /// Values carry their own length prefix.
    Variable,
}

/// Value layout of a built segment, fixed at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLayout {
    /// Inline or offset placement.
    pub placement: ValuePlacement,
    /// Fixed or variable length.
    pub length: ValueLength,
}

impl ValueLayout {
    /// Creates a layout.
    #[must_use]
    pub const fn new(placement: ValuePlacement, length: ValueLength) -> Self {
        Self { placement, length }
    }

    /// Inline values with a length prefix.
    #[must_use]
    pub const fn inline_variable() -> Self {
        Self::new(ValuePlacement::Inline, ValueLength::Variable)
    }

    /// Inline values of a fixed length.
    #[must_use]
    pub const fn inline_fixed(len: u32) -> Self {
        Self::new(ValuePlacement::Inline, ValueLength::Fixed(len))
    }

    /// Offset-placed values with a length prefix in the value store.
    #[must_use]
    pub const fn offset_variable() -> Self {
        Self::new(ValuePlacement::Offset, ValueLength::Variable)
    }

    /// Offset-placed values of a fixed length.
    #[must_use]
    pub const fn offset_fixed(len: u32) -> Self {
        Self::new(ValuePlacement::Offset, ValueLength::Fixed(len))
    }

    /// Returns true if values live in a separate value store.
    #[must_use]
    pub const fn is_offset(&self) -> bool {
        matches!(self.placement, ValuePlacement::Offset)
    }

    /// Returns the fixed value length, if any.
    #[must_use]
    pub const fn fixed_len(&self) -> Option<u32> {
        match self.length {
            ValueLength::Fixed(len) => Some(len),
            ValueLength::Variable => None,
        }
    }
}

impl Default for ValueLayout {
    fn default() -> Self {
        Self::inline_variable()
    }
}

/// Configuration of a kkv index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Time-to-live in seconds applied when a search names none.
    pub default_ttl: Option<u64>,

    /// Whether entries carry their own expire time.
    ///
    /// When set, the timestamp lower bound is disabled and liveness is
    /// decided per entry by its expire time.
    pub store_expire_time: bool,

    /// How searches are driven.
    pub search_mode: SearchMode,

    /// Rows a result buffer holds before a batch is handed to the caller.
    pub batch_rows: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            store_expire_time: false,
            search_mode: SearchMode::Blocking,
            batch_rows: 256,
        }
    }
}

impl IndexConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default time-to-live.
    #[must_use]
    pub const fn default_ttl(mut self, ttl: Option<u64>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets whether entries carry expire times.
    #[must_use]
    pub const fn store_expire_time(mut self, value: bool) -> Self {
        self.store_expire_time = value;
        self
    }

    /// Sets the search mode.
    #[must_use]
    pub const fn search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    /// Sets the result batch size in rows.
    #[must_use]
    pub const fn batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows;
        self
    }
}

/// Configuration for writing a built segment.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Recency index of the segment.
    pub id: SegmentId,

    /// Value layout.
    pub layout: ValueLayout,

    /// Whether entries store their own timestamp.
    ///
    /// When unset every entry reads back with `default_timestamp`.
    pub store_ts: bool,

    /// Whether entries store an expire time.
    pub store_expire_time: bool,

    /// Whether entries of a pkey are written in ascending skey order.
    pub skey_sorted: bool,

    /// Target payload size of a chunk in bytes.
    pub chunk_size: usize,

    /// Whether the segment was dumped from realtime ingestion.
    pub realtime: bool,

    /// Timestamp assumed for entries when `store_ts` is off.
    pub default_timestamp: Timestamp,

    /// Progress of the source the segment was built from.
    pub locator: Option<Locator>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            id: SegmentId::new(0),
            layout: ValueLayout::default(),
            store_ts: true,
            store_expire_time: false,
            skey_sorted: true,
            chunk_size: 4 * 1024, // 4 KB
            realtime: false,
            default_timestamp: 0,
            locator: None,
        }
    }
}

impl SegmentConfig {
    /// Creates a segment configuration with the given id.
    #[must_use]
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Sets the value layout.
    #[must_use]
    pub const fn layout(mut self, layout: ValueLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets whether timestamps are stored.
    #[must_use]
    pub const fn store_ts(mut self, value: bool) -> Self {
        self.store_ts = value;
        self
    }

    /// Sets whether expire times are stored.
    #[must_use]
    pub const fn store_expire_time(mut self, value: bool) -> Self {
        self.store_expire_time = value;
        self
    }

    /// Sets whether skeys are stored sorted.
    #[must_use]
    pub const fn skey_sorted(mut self, value: bool) -> Self {
        self.skey_sorted = value;
        self
    }

    /// Sets the target chunk payload size.
    #[must_use]
    pub const fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Marks the segment as realtime.
    #[must_use]
    pub const fn realtime(mut self, value: bool) -> Self {
        self.realtime = value;
        self
    }

    /// Sets the timestamp used when timestamps are not stored.
    #[must_use]
    pub const fn default_timestamp(mut self, ts: Timestamp) -> Self {
        self.default_timestamp = ts;
        self
    }

    /// Sets the source locator.
    #[must_use]
    pub const fn locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }
}
