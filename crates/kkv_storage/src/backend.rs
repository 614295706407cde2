//! The byte-store trait segments are written to and read from.

use crate::error::StorageResult;

/// One store of a built segment: its data file or its value file.
///
/// A backend hands back exactly the bytes appended to it and nothing else;
/// chunk framing, key tables and footers belong to the segment codec.
///
/// A store is filled once by a segment writer (`append`, then `flush` and
/// `sync` after the footer) and afterwards only read. Sealed segments are
/// shared by every search, including searches that read from blocking
/// worker threads, hence `Send + Sync`.
///
/// Implementations: [`super::InMemoryBackend`], [`super::FileBackend`].
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `ReadPastEnd` if the range leaves the store, `Io` if the read fails.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// `ReadOnly` for sealed file stores, `Io` if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the store size, which is also the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes data and metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;
}
