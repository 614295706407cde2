//! Cross-crate integration test helpers.
//!
//! Provides a harness that runs one request against a segment set in both
//! search modes, plus the end-to-end suites built on it.

use kkv_core::{KkvReader, ResultBuffer, SearchRequest, SegmentSet, ValueEntry};

/// A segment set and the reader that searches it.
#[derive(Debug, Clone, Default)]
pub struct SearchHarness {
    /// The reader used for every search.
    pub reader: KkvReader,
    /// The searched segments.
    pub segments: SegmentSet,
}

impl SearchHarness {
    /// Creates a harness with a default reader.
    pub fn new(segments: SegmentSet) -> Self {
        Self {
            reader: KkvReader::default(),
            segments,
        }
    }

    /// Replaces the reader.
    #[must_use]
    pub fn with_reader(mut self, reader: KkvReader) -> Self {
        self.reader = reader;
        self
    }

    /// Drains a blocking search with `rows` rows per batch.
    pub fn blocking(&self, request: &SearchRequest, rows: usize) -> Vec<ValueEntry> {
        crate::drain_blocking(&self.reader, &self.segments, request, rows)
            .expect("Blocking search failed")
    }

    /// Drains a concurrent search with `rows` rows per batch.
    pub async fn concurrent(&self, request: &SearchRequest, rows: usize) -> Vec<ValueEntry> {
        crate::drain_concurrent(&self.reader, &self.segments, request, rows)
            .await
            .expect("Concurrent search failed")
    }

    /// Runs the request in both modes and checks that they return the same
    /// rows. Must be called inside a tokio runtime.
    pub async fn agreed(&self, request: &SearchRequest, rows: usize) -> Vec<ValueEntry> {
        let blocking = self.blocking(request, rows);
        let concurrent = self.concurrent(request, rows).await;
        assert_eq!(
            concurrent, blocking,
            "modes disagree for pkey {}",
            request.pkey
        );
        blocking
    }

    /// Returns the row count of every batch a blocking search fills into
    /// `buf`.
    pub fn page_sizes(&self, request: &SearchRequest, mut buf: ResultBuffer) -> Vec<usize> {
        let mut iter = self.reader.search_blocking(&self.segments, request);
        let mut sizes = Vec::new();
        while iter.is_valid() {
            iter.batch_get(&mut buf).expect("Blocking batch failed");
            sizes.push(buf.len());
        }
        sizes
    }

    /// Concurrent counterpart of [`page_sizes`](Self::page_sizes).
    pub async fn concurrent_page_sizes(
        &self,
        request: &SearchRequest,
        mut buf: ResultBuffer,
    ) -> Vec<usize> {
        let mut iter = self.reader.search_concurrent(&self.segments, request);
        let mut sizes = Vec::new();
        while iter.is_valid() {
            iter.batch_get(&mut buf).await.expect("Concurrent batch failed");
            sizes.push(buf.len());
        }
        sizes
    }
}

#[cfg(test)]
mod concurrency;
#[cfg(test)]
mod file_segments;
#[cfg(test)]
mod properties;
#[cfg(test)]
mod search;
