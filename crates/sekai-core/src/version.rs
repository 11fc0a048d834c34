//! Version comparison for the dot-numeric version strings the game uses.
//!
//! Game versions are 2-4 dot-separated numeric segments ("3.9.0",
//! "2.4.1.10") and do not follow semver, so the comparison is done
//! segment-wise with missing segments treated as zero.

use crate::error::{Result, SekaiError};

/// Returns true when `candidate` is strictly newer than `baseline`.
///
/// Fails when either string contains a non-numeric segment.
pub fn compare_version(candidate: &str, baseline: &str) -> Result<bool> {
    let candidate = parse_segments(candidate)?;
    let baseline = parse_segments(baseline)?;
    let len = candidate.len().max(baseline.len());
    for i in 0..len {
        let new_seg = candidate.get(i).copied().unwrap_or(0);
        let cur_seg = baseline.get(i).copied().unwrap_or(0);
        if new_seg != cur_seg {
            return Ok(new_seg > cur_seg);
        }
    }
    Ok(false)
}

fn parse_segments(version: &str) -> Result<Vec<u32>> {
    version
        .split('.')
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| SekaiError::parse(format!("invalid version segment '{}': {}", s, e)))
        })
        .collect()
}
