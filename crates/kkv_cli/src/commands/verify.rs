//! Verify command implementation.

use super::segment_dirs;
use kkv_core::BuiltSegment;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of chunks whose checksum matched.
    pub valid_chunks: usize,
    /// Number of segments that failed to open or verify.
    pub corrupt_segments: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.corrupt_segments == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying segments at {:?}", path);
    println!();

    let result = verify_all(path)?;
    println!(
        "  segments checked: {}, chunks valid: {}, corrupt segments: {}",
        result.segments_checked, result.valid_chunks, result.corrupt_segments
    );
    for error in &result.errors {
        println!("    ERROR: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Segment verification passed");
        Ok(())
    } else {
        println!("✗ Segment verification failed");
        Err("Verification failed".into())
    }
}

/// Opens and verifies every segment at `path`.
pub fn verify_all(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    for dir in segment_dirs(path)? {
        result.segments_checked += 1;
        match BuiltSegment::open_dir(&dir).and_then(|segment| segment.verify()) {
            Ok(chunks) => result.valid_chunks += chunks,
            Err(err) => {
                result.corrupt_segments += 1;
                result.errors.push(format!("{}: {}", dir.display(), err));
            }
        }
    }
    Ok(result)
}
