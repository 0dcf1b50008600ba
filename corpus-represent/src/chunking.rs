//! Chunking policies (spec.md §4.6's chunking policy table).
//!
//! Grounded on the teacher's `file-chunker::text_segmenter`: its
//! boundary-scoring approach is generalized here into plain fixed-window
//! chunking with overlap, since spec.md pins exact `max_chars`/`overlap`
//! parameters rather than leaving boundary choice to a heuristic scorer.
//! The `BlockSpan`/page-range bookkeeping in that same file is the model
//! for tracking provenance (line/page/time) alongside each produced
//! segment here.

use corpus_model::{ChunkDraft, ModelError, Span};

/// Produces chunk drafts for `raw_text` representations of `doc_type=code`
/// (spec.md: "code lines", `max_lines=200, overlap=30`, `lines` spans).
pub fn chunk_code_lines(text: &str, max_lines: usize, overlap_lines: usize) -> Result<Vec<ChunkDraft>, ModelError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let lines: Vec<&str> = text.lines().collect();
    let n = lines.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let overlap = overlap_lines.min(max_lines.saturating_sub(1));

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_lines).min(n);
        windows.push((start, end));
        if end >= n {
            break;
        }
        let next_start = end.saturating_sub(overlap);
        start = if next_start <= start { end } else { next_start };
    }

    let mut drafts = Vec::new();
    let mut ordinal = 0u32;
    for (idx, (start, end)) in windows.iter().enumerate() {
        let segment = lines[*start..*end].join("\n");
        if segment.trim().is_empty() {
            continue;
        }
        let is_last = idx + 1 == windows.len();
        let _ = is_last; // code policy has no min-length drop rule
        let span = Span::Lines {
            start_line: (*start as u32) + 1,
            end_line: *end as u32,
        };
        drafts.push(ChunkDraft::new(ordinal, segment, vec![span])?);
        ordinal += 1;
    }
    Ok(drafts)
}

/// Produces chunk drafts for `raw_text` representations of
/// `doc_type ∈ {text, md, data, html}` (spec.md: "text chars",
/// `max_chars=2500, overlap=250, min=200`, `lines` spans derived from rune
/// offsets).
pub fn chunk_text_chars(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
    min_chars: usize,
) -> Result<Vec<ChunkDraft>, ModelError> {
    let windows = char_windows(text, max_chars, overlap_chars, min_chars);
    let newline_offsets = newline_byte_offsets(text);

    let mut drafts = Vec::new();
    let mut ordinal = 0u32;
    for window in windows {
        if window.text.trim().is_empty() {
            continue;
        }
        let start_line = line_at_byte(&newline_offsets, window.byte_start) + 1;
        // `byte_end` is exclusive; the last included byte determines the
        // segment's final line.
        let last_byte = window.byte_end.saturating_sub(1).max(window.byte_start);
        let end_line = line_at_byte(&newline_offsets, last_byte) + 1;
        let span = Span::Lines { start_line, end_line: end_line.max(start_line) };
        drafts.push(ChunkDraft::new(ordinal, window.text, vec![span])?);
        ordinal += 1;
    }
    Ok(drafts)
}

/// Produces chunk drafts for `ocr_markdown` representations, split on
/// form-feed (`\f`) page boundaries with no further sub-chunking (spec.md's
/// "ocr page" policy has no `max_chars`). Each chunk carries a `page` span.
pub fn chunk_ocr_pages(markdown: &str) -> Result<Vec<ChunkDraft>, ModelError> {
    if markdown.is_empty() {
        return Ok(Vec::new());
    }
    let mut drafts = Vec::new();
    let mut ordinal = 0u32;
    for (page_idx, page_text) in markdown.split('\f').enumerate() {
        if page_text.trim().is_empty() {
            continue;
        }
        let span = Span::Page { page: (page_idx as u32) + 1 };
        drafts.push(ChunkDraft::new(ordinal, page_text.to_string(), vec![span])?);
        ordinal += 1;
    }
    Ok(drafts)
}

/// One char-offset window over a text, in both char-count and byte-offset
/// coordinates (spans need byte offsets to slice `&str`, line lookups
/// need byte offsets to index `text.lines()`).
struct CharWindow {
    text: String,
    byte_start: usize,
    byte_end: usize,
}

/// Shared fixed-window-with-overlap chunker used by `text chars` and
/// `transcript`. Operates on unicode scalar values ("runes"), not bytes,
/// per spec.md's "derived from rune offsets" note.
fn char_windows(text: &str, max_chars: usize, overlap_chars: usize, min_chars: usize) -> Vec<CharWindow> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chars.saturating_sub(1));

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_chars).min(n);
        let byte_start = chars[start].0;
        let byte_end = if end < n { chars[end].0 } else { text.len() };
        windows.push((start, end, byte_start, byte_end));
        if end >= n {
            break;
        }
        let next_start = end.saturating_sub(overlap);
        start = if next_start <= start { end } else { next_start };
    }

    // Drop any non-final window whose char length is below `min_chars`;
    // the final window is always kept (spec.md: "dropped unless they are
    // the final segment" -- resolved in DESIGN.md to mean the true tail
    // chunk is never discarded, only short *intermediate* windows are).
    let last_idx = windows.len().saturating_sub(1);
    windows
        .into_iter()
        .enumerate()
        .filter(|(idx, (start, end, _, _))| *idx == last_idx || end - start >= min_chars)
        .map(|(_, (_, _, byte_start, byte_end))| CharWindow {
            text: text[byte_start..byte_end].to_string(),
            byte_start,
            byte_end,
        })
        .collect()
}

fn newline_byte_offsets(text: &str) -> Vec<usize> {
    text.bytes()
        .enumerate()
        .filter_map(|(i, b)| if b == b'\n' { Some(i) } else { None })
        .collect()
}

/// 0-based line index containing `byte_offset`, counting newlines strictly
/// before it.
fn line_at_byte(newline_offsets: &[usize], byte_offset: usize) -> u32 {
    newline_offsets.iter().filter(|&&nl| nl < byte_offset).count() as u32
}

pub(crate) fn char_windows_pub(
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
    min_chars: usize,
) -> Vec<(usize, usize, String)> {
    char_windows(text, max_chars, overlap_chars, min_chars)
        .into_iter()
        .map(|w| (w.byte_start, w.byte_end, w.text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_lines_windows_with_overlap() {
        let text = (1..=250).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_code_lines(&text, 200, 30).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].ordinal, 0);
        match chunks[0].spans[0] {
            Span::Lines { start_line, end_line } => {
                assert_eq!(start_line, 1);
                assert_eq!(end_line, 200);
            }
            _ => panic!("expected lines span"),
        }
        match chunks[1].spans[0] {
            Span::Lines { start_line, .. } => assert_eq!(start_line, 171), // 200 - 30 + 1
            _ => panic!("expected lines span"),
        }
    }

    #[test]
    fn empty_content_yields_zero_chunks() {
        assert!(chunk_code_lines("", 200, 30).unwrap().is_empty());
        assert!(chunk_text_chars("   \n  ", 2500, 250, 200).unwrap().is_empty());
        assert!(chunk_ocr_pages("").unwrap().is_empty());
    }

    #[test]
    fn text_chars_drops_whitespace_only_segments() {
        let text = format!("{}\f\f{}", "a".repeat(50), "b".repeat(50));
        // not whitespace, just sanity: no panics, produces at least one chunk
        let chunks = chunk_text_chars(&text, 2500, 250, 10).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn ocr_pages_split_on_form_feed() {
        let markdown = "page one\n\f\fpage two\n\fpage three";
        let chunks = chunk_ocr_pages(markdown).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].spans[0], Span::Page { page: 1 });
        assert_eq!(chunks[1].spans[0], Span::Page { page: 3 });
        assert_eq!(chunks[2].spans[0], Span::Page { page: 4 });
    }

    #[test]
    fn text_chars_overlap_clamped_below_max() {
        let text = "x".repeat(3000);
        let chunks = chunk_text_chars(&text, 2500, 250, 200).unwrap();
        assert_eq!(chunks.len(), 2);
    }
}
