//! Shared data model for the corpus ingestion + retrieval pipeline.
//!
//! Types here are intentionally storage-agnostic: `corpus-store` maps them
//! onto SQLite rows and ANN labels, but nothing in this crate knows about
//! either.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures shared by every crate that accepts model values
/// from an untrusted boundary (store writes, `open_file`, archive entries).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("rel_path must not be absolute: {0}")]
    AbsolutePath(String),
    #[error("rel_path must not contain a `..` segment: {0}")]
    PathTraversal(String),
    #[error("rel_path must not be empty")]
    EmptyPath,
    #[error("invalid span: {0}")]
    InvalidSpan(String),
    #[error("text must not be empty")]
    EmptyText,
}

/// Normalizes a path to a forward-slash, root-relative string and rejects
/// absolute paths or `..` segments. This is the single gate every
/// rel_path-accepting boundary (store, retrieval, archive expansion) must
/// pass input through.
pub fn normalize_rel_path(path: &str) -> Result<String, ModelError> {
    if path.is_empty() {
        return Err(ModelError::EmptyPath);
    }
    let normalized = path.replace('\\', "/");
    if normalized.starts_with('/') || is_windows_absolute(&normalized) {
        return Err(ModelError::AbsolutePath(normalized));
    }
    if normalized.split('/').any(|seg| seg == "..") {
        return Err(ModelError::PathTraversal(normalized));
    }
    Ok(normalized)
}

fn is_windows_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(v: $inner) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(DocId, i64);
id_newtype!(RepId, i64);
// ChunkId doubles as the ANN label (spec: "Label — equals the chunk_id"),
// hence the unsigned width matching the ANN index's label type.
id_newtype!(ChunkId, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    Code,
    Text,
    Md,
    Data,
    Html,
    Pdf,
    Image,
    Audio,
    Archive,
    BinaryIgnored,
    Ignore,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Code => "code",
            DocType::Text => "text",
            DocType::Md => "md",
            DocType::Data => "data",
            DocType::Html => "html",
            DocType::Pdf => "pdf",
            DocType::Image => "image",
            DocType::Audio => "audio",
            DocType::Archive => "archive",
            DocType::BinaryIgnored => "binary_ignored",
            DocType::Ignore => "ignore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "code" => DocType::Code,
            "text" => DocType::Text,
            "md" => DocType::Md,
            "data" => DocType::Data,
            "html" => DocType::Html,
            "pdf" => DocType::Pdf,
            "image" => DocType::Image,
            "audio" => DocType::Audio,
            "archive" => DocType::Archive,
            "binary_ignored" => DocType::BinaryIgnored,
            "ignore" => DocType::Ignore,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Filesystem,
    ArchiveMember,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Filesystem => "filesystem",
            SourceType::ArchiveMember => "archive_member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "filesystem" => SourceType::Filesystem,
            "archive_member" => SourceType::ArchiveMember,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocStatus {
    Ok,
    Skipped,
    SecretExcluded,
    Error,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Ok => "ok",
            DocStatus::Skipped => "skipped",
            DocStatus::SecretExcluded => "secret_excluded",
            DocStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ok" => DocStatus::Ok,
            "skipped" => DocStatus::Skipped,
            "secret_excluded" => DocStatus::SecretExcluded,
            "error" => DocStatus::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepType {
    RawText,
    OcrMarkdown,
    Transcript,
    AnnotationJson,
    AnnotationText,
}

impl RepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepType::RawText => "raw_text",
            RepType::OcrMarkdown => "ocr_markdown",
            RepType::Transcript => "transcript",
            RepType::AnnotationJson => "annotation_json",
            RepType::AnnotationText => "annotation_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "raw_text" => RepType::RawText,
            "ocr_markdown" => RepType::OcrMarkdown,
            "transcript" => RepType::Transcript,
            "annotation_json" => RepType::AnnotationJson,
            "annotation_text" => RepType::AnnotationText,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Text,
    Code,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Text => "text",
            IndexKind::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => IndexKind::Text,
            "code" => IndexKind::Code,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingStatus {
    Pending,
    Ok,
    Error,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Ok => "ok",
            EmbeddingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => EmbeddingStatus::Pending,
            "ok" => EmbeddingStatus::Ok,
            "error" => EmbeddingStatus::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub doc_id: DocId,
    pub rel_path: String,
    pub doc_type: DocType,
    pub source_type: SourceType,
    pub size_bytes: u64,
    pub mtime_unix: i64,
    pub content_hash: String,
    pub status: DocStatus,
    pub deleted: bool,
}

impl Document {
    /// Builds a new (not-yet-persisted) document row. `doc_id` is filled in
    /// by the store on upsert; `0` here is a placeholder.
    pub fn new(
        rel_path: impl Into<String>,
        doc_type: DocType,
        source_type: SourceType,
        size_bytes: u64,
        mtime_unix: i64,
        content_hash: impl Into<String>,
        status: DocStatus,
    ) -> Result<Self, ModelError> {
        let rel_path = normalize_rel_path(&rel_path.into())?;
        Ok(Self {
            doc_id: DocId(0),
            rel_path,
            doc_type,
            source_type,
            size_bytes,
            mtime_unix,
            content_hash: content_hash.into(),
            status,
            deleted: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub rep_id: RepId,
    pub doc_id: DocId,
    pub rep_type: RepType,
    pub rep_hash: String,
    pub created_unix: i64,
    pub deleted: bool,
}

/// Provenance coordinate for a chunk. Flattened to `(kind, start, end)`
/// columns at the store boundary; invalid `(kind, start, end)` tuples are
/// rejected there, not guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Span {
    Lines { start_line: u32, end_line: u32 },
    Page { page: u32 },
    Time { start_ms: u64, end_ms: u64 },
}

impl Span {
    pub fn validate(&self) -> Result<(), ModelError> {
        match self {
            Span::Lines { start_line, end_line } => {
                if *start_line < 1 || end_line < start_line {
                    return Err(ModelError::InvalidSpan(format!(
                        "lines span requires end_line >= start_line >= 1, got {start_line}..{end_line}"
                    )));
                }
            }
            Span::Page { page } => {
                if *page < 1 {
                    return Err(ModelError::InvalidSpan(format!(
                        "page span requires page >= 1, got {page}"
                    )));
                }
            }
            Span::Time { start_ms, end_ms } => {
                if end_ms < start_ms {
                    return Err(ModelError::InvalidSpan(format!(
                        "time span requires end_ms >= start_ms, got {start_ms}..{end_ms}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Span::Lines { .. } => "lines",
            Span::Page { .. } => "page",
            Span::Time { .. } => "time",
        }
    }

    /// Flattens to `(kind, start, end)` as spec.md's storage boundary requires.
    pub fn flatten(&self) -> (&'static str, i64, i64) {
        match self {
            Span::Lines { start_line, end_line } => ("lines", *start_line as i64, *end_line as i64),
            Span::Page { page } => ("page", *page as i64, *page as i64),
            Span::Time { start_ms, end_ms } => ("time", *start_ms as i64, *end_ms as i64),
        }
    }

    pub fn from_flat(kind: &str, start: i64, end: i64) -> Result<Self, ModelError> {
        let span = match kind {
            "lines" => Span::Lines {
                start_line: start as u32,
                end_line: end as u32,
            },
            "page" => Span::Page { page: start as u32 },
            "time" => Span::Time {
                start_ms: start as u64,
                end_ms: end as u64,
            },
            other => {
                return Err(ModelError::InvalidSpan(format!("unknown span kind `{other}`")));
            }
        };
        span.validate()?;
        Ok(span)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub rep_id: RepId,
    pub ordinal: u32,
    pub text: String,
    pub text_hash: String,
    pub index_kind: IndexKind,
    pub embedding_status: EmbeddingStatus,
    pub embedding_error: Option<String>,
    pub deleted: bool,
    // Denormalized for query speed (spec.md §4.1).
    pub rel_path: String,
    pub doc_type: DocType,
    pub rep_type: RepType,
}

/// A chunk plus the spans the store loaded alongside it (e.g. from
/// `next_pending`, which joins "first span by insertion order").
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWithSpans {
    pub chunk: Chunk,
    pub spans: Vec<Span>,
}

/// One representation segment, pre-chunk-id, produced by the representation
/// generator before it is handed to the store for upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub text: String,
    pub spans: Vec<Span>,
}

impl ChunkDraft {
    pub fn new(ordinal: u32, text: impl Into<String>, spans: Vec<Span>) -> Result<Self, ModelError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ModelError::EmptyText);
        }
        if spans.is_empty() {
            return Err(ModelError::InvalidSpan("chunk must have at least one span".into()));
        }
        for s in &spans {
            s.validate()?;
        }
        Ok(Self { ordinal, text, spans })
    }
}

pub fn text_sha256_hex(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

pub fn bytes_sha256_hex(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_rejects_absolute() {
        assert_eq!(normalize_rel_path("a\\b\\c.txt").unwrap(), "a/b/c.txt");
        assert!(matches!(normalize_rel_path("/etc/passwd"), Err(ModelError::AbsolutePath(_))));
        assert!(matches!(normalize_rel_path("C:\\Windows"), Err(ModelError::AbsolutePath(_))));
    }

    #[test]
    fn rejects_traversal() {
        assert!(matches!(normalize_rel_path("a/../../b"), Err(ModelError::PathTraversal(_))));
    }

    #[test]
    fn span_validation() {
        assert!(Span::Lines { start_line: 0, end_line: 1 }.validate().is_err());
        assert!(Span::Lines { start_line: 5, end_line: 2 }.validate().is_err());
        assert!(Span::Page { page: 0 }.validate().is_err());
        assert!(Span::Time { start_ms: 10, end_ms: 5 }.validate().is_err());
        assert!(Span::Lines { start_line: 1, end_line: 1 }.validate().is_ok());
    }

    #[test]
    fn span_flatten_roundtrip() {
        let s = Span::Lines { start_line: 3, end_line: 9 };
        let (k, a, b) = s.flatten();
        assert_eq!(Span::from_flat(k, a, b).unwrap(), s);
    }

    #[test]
    fn chunk_draft_rejects_empty_text() {
        assert!(ChunkDraft::new(0, "   ", vec![Span::Page { page: 1 }]).is_err());
    }
}
