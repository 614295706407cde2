//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{check_range, StorageResult};

/// A byte store held in a `Vec<u8>`.
///
/// Used for segments sealed from a building-segment dump that never touch
/// disk, and by tests that hand-craft or corrupt segment bytes.
///
/// # Example
///
/// ```rust
/// use kkv_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Returns the stored bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.bytes.len() as u64)?;
        let start = offset as usize;
        Ok(self.bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;

    #[test]
    fn offsets_follow_appends() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"chunk").unwrap(), 0);
        assert_eq!(backend.append(b" table").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"table");
    }

    #[test]
    fn reads_past_the_end_fail() {
        let backend = InMemoryBackend::from_bytes(b"hello".to_vec());
        for (offset, len) in [(10, 5), (3, 10), (u64::MAX, 2)] {
            assert!(matches!(
                backend.read_at(offset, len),
                Err(StorageError::ReadPastEnd { size: 5, .. })
            ));
        }
        assert!(backend.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn corrupted_copy_leaves_original_alone() {
        let backend = InMemoryBackend::from_bytes(b"footer".to_vec());
        let mut bytes = backend.bytes().to_vec();
        bytes[0] = b'F';
        let corrupted = InMemoryBackend::from_bytes(bytes);

        assert_eq!(backend.read_at(0, 1).unwrap(), b"f");
        assert_eq!(corrupted.read_at(0, 1).unwrap(), b"F");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn appended_chunks_read_back(chunks in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64), 1..16)) {
                let mut backend = InMemoryBackend::new();
                let mut offsets = Vec::new();
                for chunk in &chunks {
                    offsets.push(backend.append(chunk).unwrap());
                }
                for (chunk, offset) in chunks.iter().zip(offsets) {
                    prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
                }
            }
        }
    }
}
