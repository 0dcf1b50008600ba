//! Transcript parsing and time-span chunking (spec.md §4.6's `transcript`
//! representation). New logic (no direct teacher analogue for timestamp
//! parsing), grounded on the same `BlockSpan`-style provenance bookkeeping
//! the teacher's `text_segmenter` uses for pages, generalized from pages to
//! milliseconds.

use corpus_model::{ChunkDraft, ModelError, Span};

/// One parsed transcript line: its text and the wall-clock range it
/// covers. `end_ms` is filled in from the next segment's `start_ms`, or
/// equals `start_ms` for the final line if no further information exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedSegment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Parses `[hh:mm:ss]`/`mm:ss`-prefixed lines into timed segments. Lines
/// without a recognizable timestamp prefix are appended to the previous
/// segment's text (continuation lines); a transcript with no timestamped
/// line at all yields a single segment spanning `0..0`.
pub fn parse_transcript(text: &str) -> Vec<TimedSegment> {
    let mut segments: Vec<TimedSegment> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        match parse_timestamp_prefix(line) {
            Some((start_ms, rest)) => segments.push(TimedSegment { text: rest.to_string(), start_ms, end_ms: start_ms }),
            None => {
                if let Some(last) = segments.last_mut() {
                    last.text.push(' ');
                    last.text.push_str(line.trim());
                } else {
                    segments.push(TimedSegment { text: line.trim().to_string(), start_ms: 0, end_ms: 0 });
                }
            }
        }
    }

    // Fill each segment's end_ms from the next segment's start_ms; the
    // final segment's end stays equal to its own start (no further signal).
    for i in 0..segments.len().saturating_sub(1) {
        segments[i].end_ms = segments[i + 1].start_ms.max(segments[i].start_ms);
    }
    segments
}

/// Parses a leading `[hh:mm:ss]` or `mm:ss` timestamp, returning the
/// offset in milliseconds and the remaining line with the prefix and any
/// separating whitespace stripped.
fn parse_timestamp_prefix(line: &str) -> Option<(u64, &str)> {
    let line = line.trim_start();
    if let Some(rest) = line.strip_prefix('[') {
        let close = rest.find(']')?;
        let stamp = &rest[..close];
        let ms = parse_clock(stamp)?;
        return Some((ms, rest[close + 1..].trim_start()));
    }

    // Bare `mm:ss` or `hh:mm:ss` prefix followed by whitespace.
    let prefix_end = line.find(char::is_whitespace).unwrap_or(line.len());
    let candidate = &line[..prefix_end];
    let ms = parse_clock(candidate)?;
    Some((ms, line[prefix_end..].trim_start()))
}

fn parse_clock(stamp: &str) -> Option<u64> {
    let parts: Vec<&str> = stamp.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut nums = Vec::with_capacity(parts.len());
    for p in &parts {
        nums.push(p.parse::<u64>().ok()?);
    }
    let (h, m, s) = if nums.len() == 3 { (nums[0], nums[1], nums[2]) } else { (0, nums[0], nums[1]) };
    if m >= 60 || s >= 60 {
        return None;
    }
    Some(((h * 3600 + m * 60 + s) * 1000))
}

/// Chunks timed segments into bounded text windows (spec.md: `max_chars
/// =1200, overlap=120, min=80`), interpolating each chunk's `time` span
/// proportionally to its character position within the segments it spans.
pub fn chunk_transcript(
    segments: &[TimedSegment],
    max_chars: usize,
    overlap_chars: usize,
    min_chars: usize,
) -> Result<Vec<ChunkDraft>, ModelError> {
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    // Concatenate segment texts with a single space separator, tracking
    // each segment's char-offset range in the concatenated text.
    let mut full_text = String::new();
    let mut ranges: Vec<(usize, usize, &TimedSegment)> = Vec::with_capacity(segments.len());
    for seg in segments {
        if !full_text.is_empty() {
            full_text.push(' ');
        }
        let start_char = full_text.chars().count();
        full_text.push_str(&seg.text);
        let end_char = full_text.chars().count();
        ranges.push((start_char, end_char, seg));
    }

    let windows = crate::chunking::char_windows_pub(&full_text, max_chars, overlap_chars, min_chars);

    let mut drafts = Vec::new();
    let mut ordinal = 0u32;
    for (byte_start, byte_end, text) in windows {
        if text.trim().is_empty() {
            continue;
        }
        let char_start = full_text[..byte_start].chars().count();
        let char_end = full_text[..byte_end].chars().count();
        let start_ms = interpolate_time(&ranges, char_start);
        let end_ms = interpolate_time(&ranges, char_end.saturating_sub(1).max(char_start)).max(start_ms);
        drafts.push(ChunkDraft::new(ordinal, text, vec![Span::Time { start_ms, end_ms }])?);
        ordinal += 1;
    }
    Ok(drafts)
}

/// Finds the segment containing `char_pos` and linearly interpolates a
/// timestamp within its `[start_ms, end_ms]` range, proportional to the
/// position within the segment's character span.
fn interpolate_time(ranges: &[(usize, usize, &TimedSegment)], char_pos: usize) -> u64 {
    for (start, end, seg) in ranges {
        if char_pos >= *start && char_pos < *end {
            let span_len = (*end - *start).max(1) as f64;
            let offset = (char_pos - *start) as f64;
            let frac = offset / span_len;
            let ms_range = seg.end_ms.saturating_sub(seg.start_ms) as f64;
            return seg.start_ms + (ms_range * frac) as u64;
        }
    }
    ranges.last().map(|(_, _, s)| s.end_ms).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_and_bare_timestamps() {
        let text = "[00:00:05] hello there\n01:10 next segment";
        let segs = parse_transcript(text);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].start_ms, 5_000);
        assert_eq!(segs[0].text, "hello there");
        assert_eq!(segs[0].end_ms, 70_000);
        assert_eq!(segs[1].start_ms, 70_000);
    }

    #[test]
    fn continuation_lines_merge_into_prior_segment() {
        let text = "[00:00:00] first line\nsecond line continues";
        let segs = parse_transcript(text);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text, "first line second line continues");
    }

    #[test]
    fn chunk_transcript_produces_monotonic_time_spans() {
        let segs = vec![
            TimedSegment { text: "a".repeat(500), start_ms: 0, end_ms: 10_000 },
            TimedSegment { text: "b".repeat(500), start_ms: 10_000, end_ms: 20_000 },
        ];
        let chunks = chunk_transcript(&segs, 1200, 120, 80).unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            if let Span::Time { start_ms, end_ms } = c.spans[0] {
                assert!(end_ms >= start_ms);
            } else {
                panic!("expected time span");
            }
        }
    }
}
