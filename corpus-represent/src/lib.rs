//! Representation generator (C6).
//!
//! Builds `raw_text` / `ocr_markdown` / `transcript` / `annotation_*`
//! views, chunks them per spec.md §4.6's policy table, and writes the
//! representation plus its chunk/span set transactionally so an external
//! observer never sees a mixed old/new ordinal set.

mod annotation;
mod cache;
mod chunking;
mod transcript;

pub use annotation::flatten_json;
pub use cache::{CachePolicyConfig, ContentCache};
pub use transcript::{parse_transcript, TimedSegment};

use corpus_collab::{CollabError, Ocr, Transcriber};
use corpus_model::{ChunkDraft, DocType, IndexKind, ModelError, RepType, Representation, RepId};
use corpus_store::{SqliteStore, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepresentError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("collaborator error: {0}")]
    Collab(#[from] CollabError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunking parameters for every policy in spec.md §4.6's table, built
/// once at startup and passed by reference (SPEC_FULL §4 "Configuration
/// layering": no module-level mutable state).
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub code_max_lines: usize,
    pub code_overlap_lines: usize,
    pub text_max_chars: usize,
    pub text_overlap_chars: usize,
    pub text_min_chars: usize,
    pub transcript_max_chars: usize,
    pub transcript_overlap_chars: usize,
    pub transcript_min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            code_max_lines: 200,
            code_overlap_lines: 30,
            text_max_chars: 2500,
            text_overlap_chars: 250,
            text_min_chars: 200,
            transcript_max_chars: 1200,
            transcript_overlap_chars: 120,
            transcript_min_chars: 80,
        }
    }
}

/// Normalizes arbitrary bytes to valid UTF-8 (invalid sequences replaced
/// with U+FFFD) and LF line endings, per spec.md §4.6's `raw_text` policy.
pub fn normalize_text(bytes: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(bytes).into_owned();
    lossy.replace("\r\n", "\n").replace('\r', "\n")
}

/// Builds chunk drafts for a `raw_text` representation. `doc_type=code`
/// chunks by lines and is assigned `IndexKind::Code`; every other raw-text
/// doc type chunks by characters and is assigned `IndexKind::Text`.
pub fn raw_text_chunks(
    doc_type: DocType,
    normalized: &str,
    cfg: &ChunkingConfig,
) -> Result<(Vec<ChunkDraft>, IndexKind), RepresentError> {
    if doc_type == DocType::Code {
        Ok((chunking::chunk_code_lines(normalized, cfg.code_max_lines, cfg.code_overlap_lines)?, IndexKind::Code))
    } else {
        Ok((
            chunking::chunk_text_chars(normalized, cfg.text_max_chars, cfg.text_overlap_chars, cfg.text_min_chars)?,
            IndexKind::Text,
        ))
    }
}

/// Builds chunk drafts for an `ocr_markdown` representation (page-bounded,
/// no sub-splitting per spec.md's policy table).
pub fn ocr_markdown_chunks(markdown: &str) -> Result<Vec<ChunkDraft>, RepresentError> {
    Ok(chunking::chunk_ocr_pages(markdown)?)
}

/// Builds chunk drafts for a `transcript` representation.
pub fn transcript_chunks(transcript_text: &str, cfg: &ChunkingConfig) -> Result<Vec<ChunkDraft>, RepresentError> {
    let segments = transcript::parse_transcript(transcript_text);
    Ok(transcript::chunk_transcript(
        &segments,
        cfg.transcript_max_chars,
        cfg.transcript_overlap_chars,
        cfg.transcript_min_chars,
    )?)
}

/// Runs an OCR extraction through the content-addressed cache: returns
/// the cached markdown if present, otherwise calls `ocr` and writes the
/// result before returning it (spec.md §4.6: "cached on disk... and
/// reused across runs").
pub async fn ocr_markdown_cached(
    ocr: &dyn Ocr,
    cache: &ContentCache,
    rel_path: &str,
    bytes: &[u8],
    content_hash: &str,
) -> Result<String, RepresentError> {
    if let Some(cached) = cache.get(content_hash, "md") {
        return Ok(cached);
    }
    let markdown = ocr.extract(rel_path, bytes).await?;
    cache.put(content_hash, "md", &markdown)?;
    Ok(markdown)
}

/// Runs a transcription through the content-addressed cache, mirroring
/// [`ocr_markdown_cached`].
pub async fn transcript_cached(
    transcriber: &dyn Transcriber,
    cache: &ContentCache,
    rel_path: &str,
    bytes: &[u8],
    content_hash: &str,
) -> Result<String, RepresentError> {
    if let Some(cached) = cache.get(content_hash, "txt") {
        return Ok(cached);
    }
    let text = transcriber.transcribe(rel_path, bytes).await?;
    cache.put(content_hash, "txt", &text)?;
    Ok(text)
}

/// Writes one representation's full chunk set transactionally: upserts
/// the representation, upserts every chunk+spans in order, then
/// tombstones any stale tail past `chunks.len()` (spec.md §4.6's
/// "Transactional write path").
#[allow(clippy::too_many_arguments)]
pub fn write_representation(
    store: &SqliteStore,
    doc_id: corpus_model::DocId,
    rel_path: &str,
    doc_type: DocType,
    rep_type: RepType,
    rep_hash: String,
    created_unix: i64,
    chunks: Vec<ChunkDraft>,
    index_kind: IndexKind,
) -> Result<RepId, RepresentError> {
    let rep_id = store.with_tx(|tx| {
        let rep_id = tx.upsert_representation(&Representation {
            rep_id: RepId(0),
            doc_id,
            rep_type,
            rep_hash: rep_hash.clone(),
            created_unix,
            deleted: false,
        })?;

        for draft in &chunks {
            tx.insert_chunk_with_spans(rep_id, draft, index_kind, rel_path, doc_type, rep_type)?;
        }
        tx.soft_delete_chunks_from_ordinal(rep_id, chunks.len() as u32)?;

        Ok(rep_id)
    })?;
    Ok(rep_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpus_model::{bytes_sha256_hex, DocId, DocStatus, Document, SourceType};

    #[test]
    fn normalize_replaces_crlf_and_invalid_utf8() {
        let bytes = b"line1\r\nline2\rline3\xff";
        let normalized = normalize_text(bytes);
        assert!(normalized.contains("line1\nline2\nline3"));
        assert!(normalized.contains('\u{FFFD}'));
    }

    #[test]
    fn raw_text_chunks_picks_index_kind_by_doc_type() {
        let cfg = ChunkingConfig::default();
        let (chunks, kind) = raw_text_chunks(DocType::Code, "fn main() {}\n", &cfg).unwrap();
        assert_eq!(kind, IndexKind::Code);
        assert_eq!(chunks.len(), 1);

        let (chunks, kind) = raw_text_chunks(DocType::Text, "hello world", &cfg).unwrap();
        assert_eq!(kind, IndexKind::Text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn write_representation_is_transactional_and_trims_stale_tail() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc = Document::new("a.txt", DocType::Text, SourceType::Filesystem, 10, 0, "h", DocStatus::Ok).unwrap();
        let doc_id = store.upsert_document(&doc).unwrap();

        let cfg = ChunkingConfig::default();
        let (chunks, kind) = raw_text_chunks(DocType::Text, "alpha beta gamma", &cfg).unwrap();
        let rep_hash = bytes_sha256_hex(b"alpha beta gamma");
        write_representation(&store, doc_id, "a.txt", DocType::Text, RepType::RawText, rep_hash, 0, chunks, kind)
            .unwrap();
        assert_eq!(store.corpus_stats().unwrap().chunks_total, 1);

        // Re-generate with fewer chunks (simulated by an empty content
        // change): the stale tail must be tombstoned.
        let empty_rep_hash = bytes_sha256_hex(b"");
        write_representation(
            &store,
            doc_id,
            "a.txt",
            DocType::Text,
            RepType::RawText,
            empty_rep_hash,
            1,
            Vec::new(),
            kind,
        )
        .unwrap();
        assert_eq!(store.corpus_stats().unwrap().chunks_total, 0);
    }
}
