//! CLI command implementations.

pub mod get;
pub mod inspect;
pub mod verify;

use kkv_core::segment::DATA_FILE_NAME;
use std::fs;
use std::path::{Path, PathBuf};

/// Returns the segment directories at `path`.
///
/// `path` is either a segment directory itself or an index directory whose
/// subdirectories are segments. Subdirectories without a data file are
/// ignored.
pub fn segment_dirs(path: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    if path.join(DATA_FILE_NAME).exists() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(format!("No segments found at {:?}", path).into());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let dir = entry?.path();
        if dir.join(DATA_FILE_NAME).exists() {
            dirs.push(dir);
        }
    }
    dirs.sort();
    Ok(dirs)
}
