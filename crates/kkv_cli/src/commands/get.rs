//! Get command implementation.

use super::segment_dirs;
use kkv_core::{
    BuiltSegment, IndexConfig, KkvReader, PKey, ResultBuffer, SKey, SearchMode, SearchRequest,
    SegmentSet, ValueEntry,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Options of one lookup.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Primary key hash.
    pub pkey: u64,
    /// Wanted skeys; empty means all.
    pub skeys: Vec<u64>,
    /// Time-to-live in seconds.
    pub ttl: Option<u64>,
    /// Query time; the current time if unset.
    pub now: Option<u64>,
    /// Row quota.
    pub quota: Option<usize>,
    /// Rows per batch.
    pub batch: Option<usize>,
    /// Whether to fan segment reads out to tasks.
    pub concurrent: bool,
    /// Whether to keep segment order.
    pub keep_sort_order: bool,
}

/// One printed row.
#[derive(Debug, Serialize)]
pub struct Row {
    /// Secondary key.
    pub skey: u64,
    /// Write timestamp.
    pub timestamp: u64,
    /// Expire time, if stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<u64>,
    /// Value as text, or hex when not printable.
    pub value: String,
    /// Whether a newer building segment already produced the skey.
    pub duplicate: bool,
}

impl From<&ValueEntry> for Row {
    fn from(entry: &ValueEntry) -> Self {
        Self {
            skey: entry.skey.as_u64(),
            timestamp: entry.timestamp,
            expire_time: entry.expire_time,
            value: render_value(&entry.value),
            duplicate: entry.duplicate,
        }
    }
}

/// Runs the get command.
pub fn run(
    path: &Path,
    options: &GetOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows = lookup(path, options)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            for row in &rows {
                let marker = if row.duplicate { " (duplicate)" } else { "" };
                println!("{}\t{}\t{}{}", row.skey, row.timestamp, row.value, marker);
            }
        }
    }
    Ok(())
}

/// Opens every segment under `path` and runs the search.
pub fn lookup(path: &Path, options: &GetOptions) -> Result<Vec<Row>, Box<dyn std::error::Error>> {
    let mut segments = SegmentSet::new();
    for dir in segment_dirs(path)? {
        segments.push_built(Arc::new(BuiltSegment::open_dir(&dir)?));
    }

    let mode = if options.concurrent {
        SearchMode::Concurrent
    } else {
        SearchMode::Blocking
    };
    let config = IndexConfig::new().search_mode(mode);
    let batch_rows = options.batch.unwrap_or(config.batch_rows);
    let reader = KkvReader::new(config);

    let now = match options.now {
        Some(now) => now,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
    };
    let mut request = SearchRequest::new(PKey::new(options.pkey), now)
        .skeys(options.skeys.iter().copied().map(SKey::new))
        .keep_sort_order(options.keep_sort_order);
    if let Some(ttl) = options.ttl {
        request = request.ttl(ttl);
    }
    if let Some(quota) = options.quota {
        request = request.quota(quota);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let rows = runtime.block_on(async {
        let mut iter = reader.search(&segments, request)?;
        let mut buf = ResultBuffer::new(batch_rows);
        let mut rows = Vec::new();
        while iter.is_valid() {
            iter.batch_get(&mut buf).await?;
            rows.extend(buf.entries().iter().map(Row::from));
        }
        info!(
            pkey = options.pkey,
            rows = rows.len(),
            pkey_tombstone = iter.has_pkey_tombstone(),
            metrics = ?iter.metrics(),
            "lookup finished"
        );
        Ok::<_, kkv_core::CoreError>(rows)
    })?;
    Ok(rows)
}

/// Renders printable ASCII as text and anything else as hex.
fn render_value(value: &[u8]) -> String {
    if !value.is_empty() && value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        String::from_utf8_lossy(value).into_owned()
    } else {
        let hex: String = value.iter().map(|b| format!("{:02x}", b)).collect();
        format!("0x{}", hex)
    }
}
