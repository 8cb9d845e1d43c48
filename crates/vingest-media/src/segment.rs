//! Segment planning and deterministic enumeration of transcoder output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// File name prefix of produced segments.
pub const SEGMENT_PREFIX: &str = "segment_";

/// Remainders shorter than this are rounding noise, not a segment.
const MIN_SEGMENT_SECS: f64 = 1e-3;

/// One produced, independently playable segment on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentFile {
    pub index: u32,
    pub path: PathBuf,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub size_bytes: u64,
}

/// Expected segment boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedSegment {
    pub index: u32,
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// Fixed-length split of `total_secs` into pieces of at most `max_segment_secs`.
///
/// The transcoder cuts on keyframes, so real boundaries land at or after
/// these; the plan gives the nominal count and durations.
pub fn plan_segments(total_secs: f64, max_segment_secs: f64) -> Vec<PlannedSegment> {
    if total_secs.is_nan() || total_secs <= 0.0 || max_segment_secs.is_nan() || max_segment_secs <= 0.0 {
        return Vec::new();
    }

    let mut plan = Vec::new();
    let mut start = 0.0;
    let mut index = 0u32;
    while total_secs - start > MIN_SEGMENT_SECS {
        let duration = (total_secs - start).min(max_segment_secs);
        plan.push(PlannedSegment {
            index,
            start_secs: start,
            duration_secs: duration,
        });
        start += duration;
        index += 1;
    }
    plan
}

/// Output pattern handed to FFmpeg's segment muxer.
pub fn segment_pattern(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("{}%03d.{}", SEGMENT_PREFIX, extension))
}

/// Index encoded in a segment file name, e.g. `segment_012.mp4` -> 12.
pub fn parse_segment_index(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(SEGMENT_PREFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// List the segment files in `dir`, ordered by parsed index then by name.
///
/// Directory enumeration order is never relied on. The indices must form
/// the contiguous range `0..n`; a gap means the transcoder output is
/// incomplete and is reported as malformed.
pub async fn collect_segment_files(dir: &Path) -> MediaResult<Vec<(u32, PathBuf)>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(index) = parse_segment_index(&name) {
            found.push((index, name, entry.path()));
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    for (position, (index, name, _)) in found.iter().enumerate() {
        if *index as usize != position {
            return Err(MediaError::malformed_output(format!(
                "expected segment {} but found {}",
                position, name
            )));
        }
    }

    Ok(found.into_iter().map(|(i, _, p)| (i, p)).collect())
}
