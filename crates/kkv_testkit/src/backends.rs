//! Storage backends for fault and timing tests.
//!
//! Both wrappers forward to an inner backend. [`LatencyBackend`] sleeps
//! before every read so that segment tasks finish in a chosen order;
//! [`FailingBackend`] turns reads into I/O errors once its switch is armed.

use kkv_core::{BuiltSegment, BuiltSegmentWriter, CoreResult};
use kkv_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A backend that delays every read.
#[derive(Debug)]
pub struct LatencyBackend<B> {
    inner: B,
    delay: Duration,
}

impl<B: StorageBackend> LatencyBackend<B> {
    /// Wraps `inner`, sleeping `delay` before each read.
    pub fn new(inner: B, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<B: StorageBackend> StorageBackend for LatencyBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        thread::sleep(self.delay);
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }
}

/// Shared switch that makes a [`FailingBackend`] fail.
#[derive(Debug, Clone, Default)]
pub struct FailSwitch(Arc<AtomicBool>);

impl FailSwitch {
    /// Creates a disarmed switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later read fail.
    pub fn arm(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lets reads through again.
    pub fn disarm(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true while reads fail.
    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A backend whose reads fail while its switch is armed.
#[derive(Debug)]
pub struct FailingBackend<B> {
    inner: B,
    switch: FailSwitch,
}

impl<B: StorageBackend> FailingBackend<B> {
    /// Wraps `inner`, failing reads whenever `switch` is armed.
    pub fn new(inner: B, switch: FailSwitch) -> Self {
        Self { inner, switch }
    }
}

impl<B: StorageBackend> StorageBackend for FailingBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        if self.switch.is_armed() {
            return Err(StorageError::Io(io::Error::other(format!(
                "injected read failure at offset {offset}"
            ))));
        }
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }
}

/// Seals a segment into memory and reopens it over wrapped backends.
///
/// `wrap` receives the data store first and, for offset layouts, the value
/// store second.
pub fn seal_with<F>(writer: BuiltSegmentWriter, wrap: F) -> CoreResult<BuiltSegment>
where
    F: Fn(InMemoryBackend) -> Arc<dyn StorageBackend>,
{
    let offset = writer.config().layout.is_offset();
    let mut data = InMemoryBackend::new();
    let mut values = InMemoryBackend::new();
    writer.finish(&mut data, Some(&mut values))?;

    let values = if offset { Some(wrap(values)) } else { None };
    BuiltSegment::open(wrap(data), values)
}

/// Seals a segment whose reads all take at least `delay`.
pub fn seal_slow(writer: BuiltSegmentWriter, delay: Duration) -> CoreResult<BuiltSegment> {
    seal_with(writer, |inner| Arc::new(LatencyBackend::new(inner, delay)))
}

/// Seals a segment whose reads fail while `switch` is armed.
pub fn seal_failing(writer: BuiltSegmentWriter, switch: &FailSwitch) -> CoreResult<BuiltSegment> {
    seal_with(writer, |inner| {
        Arc::new(FailingBackend::new(inner, switch.clone()))
    })
}
