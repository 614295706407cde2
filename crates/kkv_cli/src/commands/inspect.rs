//! Inspect command implementation.

use super::segment_dirs;
use kkv_core::segment::{DATA_FILE_NAME, VALUE_FILE_NAME};
use kkv_core::{BuiltSegment, ValueLength, ValuePlacement};
use kkv_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

/// Inspection result for one segment directory.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Segment directory.
    pub path: String,
    /// Recency index.
    pub segment_id: u64,
    /// Value placement (inline, offset).
    pub placement: String,
    /// Fixed value length, if any.
    pub fixed_value_len: Option<u32>,
    /// Whether entries store timestamps.
    pub store_ts: bool,
    /// Whether entries store expire times.
    pub store_expire_time: bool,
    /// Whether skeys are stored in ascending order.
    pub skey_sorted: bool,
    /// Whether the segment came from realtime ingestion.
    pub realtime: bool,
    /// Newest timestamp in the segment.
    pub max_timestamp: u64,
    /// Source locator, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Number of pkeys.
    pub key_count: usize,
    /// Number of pkeys with a pkey tombstone.
    pub pkey_tombstones: usize,
    /// Number of stored entries, skey tombstones included.
    pub entry_count: u64,
    /// Data file size in bytes.
    pub data_size: u64,
    /// Value file size in bytes.
    pub value_size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dirs = segment_dirs(path)?;
    if dirs.is_empty() {
        return Err(format!("No segments found at {:?}", path).into());
    }

    let mut results = Vec::with_capacity(dirs.len());
    for dir in &dirs {
        results.push(inspect_segment(dir)?);
    }

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        _ => {
            for result in &results {
                print_text_output(result);
            }
        }
    }

    Ok(())
}

/// Opens one segment directory and summarizes it.
pub fn inspect_segment(dir: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let segment = BuiltSegment::open_dir(dir)?;
    let footer = segment.footer();

    let data_size = FileBackend::open_existing(&dir.join(DATA_FILE_NAME))?.size()?;
    let value_path = dir.join(VALUE_FILE_NAME);
    let value_size = if value_path.exists() {
        FileBackend::open_existing(&value_path)?.size()?
    } else {
        0
    };

    let keys = segment.keys();
    Ok(InspectResult {
        path: dir.display().to_string(),
        segment_id: footer.segment_id.as_u64(),
        placement: match footer.layout.placement {
            ValuePlacement::Inline => "inline".to_string(),
            ValuePlacement::Offset => "offset".to_string(),
        },
        fixed_value_len: match footer.layout.length {
            ValueLength::Fixed(len) => Some(len),
            ValueLength::Variable => None,
        },
        store_ts: footer.store_ts,
        store_expire_time: footer.store_expire_time,
        skey_sorted: footer.skey_sorted,
        realtime: footer.realtime,
        max_timestamp: footer.max_timestamp,
        locator: footer.locator.map(|locator| locator.to_string()),
        key_count: keys.len(),
        pkey_tombstones: keys.iter().filter(|key| key.has_pkey_tombstone()).count(),
        entry_count: keys.iter().map(|key| u64::from(key.entry_count)).sum(),
        data_size,
        value_size,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Segment: {}", result.path);
    println!("  Id:               {}", result.segment_id);
    match result.fixed_value_len {
        Some(len) => println!("  Layout:           {}, fixed {} bytes", result.placement, len),
        None => println!("  Layout:           {}, variable", result.placement),
    }
    println!("  Store ts:         {}", result.store_ts);
    println!("  Store expire:     {}", result.store_expire_time);
    println!("  Skey sorted:      {}", result.skey_sorted);
    println!("  Realtime:         {}", result.realtime);
    println!("  Max timestamp:    {}", result.max_timestamp);
    if let Some(locator) = &result.locator {
        println!("  Locator:          {}", locator);
    }
    println!("  Pkeys:            {}", result.key_count);
    println!("  Pkey tombstones:  {}", result.pkey_tombstones);
    println!("  Entries:          {}", result.entry_count);
    println!("  Data size:        {} bytes", result.data_size);
    println!("  Value size:       {} bytes", result.value_size);
    println!();
}
