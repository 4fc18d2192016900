//! Segment selection around a mention

use super::Segment;
use std::collections::HashSet;

/// Half-width of the clip context window
pub const CLIP_WINDOW_RADIUS_MS: u64 = 180_000;

/// Segments taken after the anchor of a teaching block
pub const DEFAULT_BLOCK_AFTER: usize = 60;

/// Segments taken before the anchor of a teaching block
const BLOCK_BEFORE: usize = 2;

/// A teaching block must add more than this many unseen segments
const MIN_NEW_SEGMENTS: usize = 5;

/// Segments whose start lies within `radius_ms` of `center_ms`, both ends inclusive
pub fn symmetric_window(segments: &[Segment], center_ms: u64, radius_ms: u64) -> Vec<&Segment> {
    segments
        .iter()
        .filter(|s| s.start_ms.abs_diff(center_ms) <= radius_ms)
        .collect()
}

/// Index of the first segment whose start is at or after `timestamp`.
///
/// Compares timestamp strings, which only matches chronological order for
/// zero-padded sub-24h values.
pub fn block_start_index(segments: &[Segment], timestamp: &str) -> Option<usize> {
    segments.iter().position(|s| s.start.as_str() >= timestamp)
}

/// Index range `[idx - 2, idx + after)` around the first segment at or after `timestamp`
pub fn block_range(segments: &[Segment], timestamp: &str, after: usize) -> Option<std::ops::Range<usize>> {
    let idx = block_start_index(segments, timestamp)?;
    let start = idx.saturating_sub(BLOCK_BEFORE);
    let end = (idx + after).min(segments.len());
    Some(start..end)
}

/// Forward teaching block; empty when no segment starts at or after `timestamp`
pub fn forward_block<'a>(segments: &'a [Segment], timestamp: &str, after: usize) -> &'a [Segment] {
    match block_range(segments, timestamp, after) {
        Some(range) => &segments[range],
        None => &[],
    }
}

/// Merge the forward blocks of several mentions.
///
/// A block is kept only when it contributes more than five segments that no
/// earlier block contained; its new segments are returned in order.
pub fn teaching_blocks<'a>(segments: &'a [Segment], timestamps: &[&str], after: usize) -> Vec<Vec<&'a Segment>> {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();

    for timestamp in timestamps {
        let Some(range) = block_range(segments, timestamp, after) else {
            continue;
        };

        let fresh: Vec<usize> = range.filter(|i| !seen.contains(i)).collect();
        if fresh.len() <= MIN_NEW_SEGMENTS {
            continue;
        }

        seen.extend(fresh.iter().copied());
        blocks.push(fresh.into_iter().map(|i| &segments[i]).collect());
    }

    blocks
}
