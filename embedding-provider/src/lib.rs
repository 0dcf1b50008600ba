//! Concrete [`corpus_collab::Embedder`] implementations.
//!
//! `OnnxEmbedder` is grounded directly on the teacher's
//! `embedding_provider::embedder::OnnxStdIoEmbedder` (ONNX Runtime session
//! + tokenizer + mean-pooling), generalized from a single hard-coded model
//! to a `model: &str`-keyed map of sessions so it can serve spec.md's
//! `embed_text_model` and `embed_code_model` from one embedder instance,
//! since spec.md's collaborator contract is `embed(model, texts)` rather
//! than the teacher's single-model `embed`/`embed_batch`.
//!
//! `DeterministicEmbedder` is grounded on the teacher's
//! `OnnxHttpEmbedder`/`DeterministicEmbedderCore` (hash-derived vectors),
//! kept here as the embedder used by tests and by any caller without a
//! real ONNX model on disk.

mod onnx;

pub use onnx::{ModelConfig, OnnxEmbedder, OnnxEmbedderError};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use corpus_collab::{CollabError, Embedder};

/// Deterministic pseudo-embedder: same `(model, text)` always yields the
/// same vector, and distinct texts yield distinct vectors with high
/// probability. No network or model file required.
#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    dimension: usize,
    max_input_chars: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, max_input_chars: 100_000 }
    }

    fn generate(&self, model: &str, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        for index in 0..self.dimension {
            let mut hasher = DefaultHasher::new();
            model.hash(&mut hasher);
            index.hash(&mut hasher);
            text.hash(&mut hasher);
            out.push(normalize_hash(hasher.finish()));
        }
        out
    }
}

fn normalize_hash(value: u64) -> f32 {
    const SCALE: f64 = 2.0;
    let normalized = (value as f64) / (u64::MAX as f64);
    (normalized * SCALE - 1.0) as f32
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, CollabError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if text.chars().count() > self.max_input_chars {
                return Err(CollabError::Terminal(format!(
                    "input exceeds max length of {} chars",
                    self.max_input_chars
                )));
            }
            out.push(self.generate(model, text));
        }
        Ok(out)
    }

    fn dimension(&self, _model: &str) -> Option<usize> {
        Some(self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_input_yields_same_vector() {
        let e = DeterministicEmbedder::new(8);
        let a = e.embed("text", &["hello".to_string()]).await.unwrap();
        let b = e.embed("text", &["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_models_yield_different_vectors() {
        let e = DeterministicEmbedder::new(8);
        let a = e.embed("text", &["hello".to_string()]).await.unwrap();
        let b = e.embed("code", &["hello".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn rejects_overlong_input() {
        let mut e = DeterministicEmbedder::new(4);
        e.max_input_chars = 3;
        let err = e.embed("text", &["abcd".to_string()]).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
