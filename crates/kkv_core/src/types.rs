//! Core type definitions for kkv.

use std::fmt;

/// Seconds since the epoch. Entry timestamps, expire times and `now` all use it.
pub type Timestamp = u64;

/// Hashed primary key identifying one group of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PKey(pub u64);

impl PKey {
    /// Creates a new primary key from its hash.
    #[must_use]
    pub const fn new(hash: u64) -> Self {
        Self(hash)
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkey:{}", self.0)
    }
}

/// Secondary key distinguishing values inside one pkey group.
///
/// Secondary keys are totally ordered; skey-sorted segments store them
/// ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SKey(pub u64);

impl SKey {
    /// Creates a new secondary key.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skey:{}", self.0)
    }
}

/// Recency index of a built segment.
///
/// Higher ids are newer. Building segments are always newer than any built
/// segment regardless of id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Progress marker of a data source.
///
/// A realtime segment records the locator of the last write it contains.
/// A search may carry a watermark; a segment whose locator the watermark
/// covers holds only data that a fresher source already serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    /// Data source the offsets refer to.
    pub source: u32,
    /// Monotonic position inside the source.
    pub offset: u64,
}

impl Locator {
    /// Creates a new locator.
    #[must_use]
    pub const fn new(source: u32, offset: u64) -> Self {
        Self { source, offset }
    }

    /// Returns whether this watermark has progressed past `other`.
    ///
    /// Locators of different sources are never comparable.
    #[must_use]
    pub const fn covers(&self, other: &Locator) -> bool {
        self.source == other.source && self.offset >= other.offset
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source, self.offset)
    }
}
