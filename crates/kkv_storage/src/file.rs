//! File-based storage backend for persisted segments.

use crate::backend::StorageBackend;
use crate::error::{check_range, StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One file of a persisted built segment.
///
/// A segment file is written once by the segment writer through
/// [`create`](Self::create), then reopened read-only with
/// [`open_existing`](Self::open_existing) and shared by every search.
/// Reads seek and read under a single lock so concurrent readers never see
/// each other's file position.
///
/// # Example
///
/// ```no_run
/// use kkv_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("segment_1/data.kkv")).unwrap();
/// backend.append(b"chunk bytes").unwrap();
/// backend.sync().unwrap();
///
/// let sealed = FileBackend::open_existing(Path::new("segment_1/data.kkv")).unwrap();
/// assert_eq!(sealed.read_at(0, 5).unwrap(), b"chunk");
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
    writable: bool,
}

impl FileBackend {
    /// Creates a new, empty segment file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists or cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: 0,
            writable: true,
        })
    }

    /// Opens an existing segment file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
            writable: false,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StorageError::ReadOnly {
                path: self.path.clone(),
            })
        }
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        check_range(offset, len, self.size)?;
        let mut buffer = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_writable()?;
        let offset = self.size;
        self.file.get_mut().write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.writable {
            self.file.get_mut().flush()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.ensure_writable()?;
        self.file.get_mut().sync_all()?;
        Ok(())
    }
}
