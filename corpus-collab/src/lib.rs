//! Narrow collaborator traits consumed by the core (spec.md §6): `Embedder`,
//! `Ocr`, `Transcriber`, `Generator`. The core never depends on a concrete
//! HTTP/ONNX/CLI implementation — only on these traits — so MCP/HTTP
//! framing, auth, and the actual model backends stay out of the pipeline
//! crates, exactly as spec.md §1 scopes them out as "external
//! collaborators".
//!
//! Also centralizes the transient/terminal error classifier spec.md §9
//! calls for ("Retry policy as a contract, not code"): this is the single
//! place that decides whether a chunk stays pending or is marked failed.

use async_trait::async_trait;
use thiserror::Error;

/// Error returned by any collaborator call. `Transient` preserves pending
/// state and is retried by the caller; `Terminal` causes the caller to
/// mark the chunk/document failed with the carried reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollabError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("terminal: {0}")]
    Terminal(String),
    #[error("cancelled")]
    Cancelled,
}

impl CollabError {
    /// Centralized transient-vs-terminal classification (spec.md §9, §4.9
    /// step 4): context cancellation/deadline, timeout-class network
    /// errors, and rate-limit substrings are transient; everything else a
    /// collaborator reports is terminal. Callers that receive a raw error
    /// string from a provider (rather than a typed `CollabError`) should
    /// run it through [`classify`] rather than re-deriving this list.
    pub fn is_transient(&self) -> bool {
        matches!(self, CollabError::Transient(_) | CollabError::Cancelled)
    }
}

/// Classifies a raw provider error message into a [`CollabError`]. This is
/// the one place that decides "does this chunk stay pending, or get marked
/// failed" (spec.md §9's "Retry policy as a contract, not code").
pub fn classify(message: impl Into<String>) -> CollabError {
    let message = message.into();
    let lower = message.to_ascii_lowercase();
    const TRANSIENT_SUBSTRINGS: &[&str] = &[
        "timeout",
        "timed out",
        "rate limit",
        "rate-limit",
        "too many requests",
        "429",
        "connection reset",
        "connection refused",
        "dns",
        "temporarily unavailable",
        "context cancel",
        "context deadline",
    ];
    if TRANSIENT_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        CollabError::Transient(message)
    } else {
        CollabError::Terminal(message)
    }
}

/// Embeds batches of text into fixed-width vectors. `model` selects among
/// the caller's configured models (spec.md's `embed_text_model` /
/// `embed_code_model`); vector length is constant per model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, CollabError>;

    /// Dimension produced for `model`, when statically known. Retrieval
    /// uses this only for diagnostics; the ANN index itself learns its
    /// dimension from the first `add`.
    fn dimension(&self, model: &str) -> Option<usize> {
        let _ = model;
        None
    }
}

/// Extracts markdown (with form-feed page breaks) from a PDF or image.
#[async_trait]
pub trait Ocr: Send + Sync {
    async fn extract(&self, rel_path: &str, bytes: &[u8]) -> Result<String, CollabError>;
}

/// Transcribes audio into text carrying `[hh:mm:ss]`/`mm:ss` timestamps.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, rel_path: &str, bytes: &[u8]) -> Result<String, CollabError>;
}

/// Generates a chat completion from a fully-assembled RAG prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollabError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_and_timeout_as_transient() {
        assert!(classify("rate limit exceeded").is_transient());
        assert!(classify("request timed out").is_transient());
        assert!(classify("HTTP 429 Too Many Requests").is_transient());
    }

    #[test]
    fn classifies_validation_as_terminal() {
        assert!(!classify("400 bad request: invalid input").is_transient());
    }

    #[test]
    fn cancellation_is_transient() {
        assert!(CollabError::Cancelled.is_transient());
    }
}
