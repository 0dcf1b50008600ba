//! Local ONNX Runtime embedder, keyed by model name.
//!
//! Lifted from the teacher's `OnnxStdIoEmbedder` (session + tokenizer +
//! mean-pooling over the attention mask) and generalized to hold one
//! session per configured model name, since spec.md's collaborator
//! contract passes `model` per call instead of binding one model per
//! embedder instance.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use corpus_collab::{CollabError, Embedder};
use ndarray::Array2;
use ort::{session::Session, value::Tensor, Error as OrtError};
use thiserror::Error;
use tokenizers::{Encoding, Tokenizer};

#[derive(Debug, Error)]
pub enum OnnxEmbedderError {
    #[error("invalid embedder configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("provider failure: {0}")]
    ProviderFailure(String),
}

/// Configuration for one named model (text or code) backed by an ONNX
/// session driven through the shared ONNX Runtime library.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_input_tokens: usize,
}

struct ModelSession {
    session: Mutex<Session>,
    tokenizer: Arc<Tokenizer>,
    pad_id: i64,
    dimension: usize,
    max_input_tokens: usize,
}

static ORT_RUNTIME_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Multi-model ONNX embedder: one [`ModelSession`] per configured name
/// (typically `"text"` and `"code"`, matching spec.md's
/// `embed_text_model`/`embed_code_model`).
pub struct OnnxEmbedder {
    models: HashMap<String, Arc<ModelSession>>,
}

impl OnnxEmbedder {
    pub fn new(
        runtime_library_path: &Path,
        models: HashMap<String, ModelConfig>,
    ) -> Result<Self, OnnxEmbedderError> {
        if models.is_empty() {
            return Err(OnnxEmbedderError::InvalidConfiguration("no models configured".into()));
        }
        let runtime_library_path = resolve_existing_path(runtime_library_path, "ONNX Runtime shared library")?;
        ensure_ort_initialized(&runtime_library_path)?;

        let mut out = HashMap::with_capacity(models.len());
        for (name, cfg) in models {
            out.insert(name, Arc::new(load_model(&cfg)?));
        }
        Ok(Self { models: out })
    }

    fn model(&self, name: &str) -> Result<Arc<ModelSession>, OnnxEmbedderError> {
        self.models.get(name).cloned().ok_or_else(|| OnnxEmbedderError::UnknownModel(name.to_string()))
    }
}

fn load_model(cfg: &ModelConfig) -> Result<ModelSession, OnnxEmbedderError> {
    if cfg.dimension == 0 {
        return Err(OnnxEmbedderError::InvalidConfiguration("dimension must be greater than zero".into()));
    }
    if cfg.max_input_tokens == 0 {
        return Err(OnnxEmbedderError::InvalidConfiguration("max_input_tokens must be greater than zero".into()));
    }
    let model_path = resolve_existing_path(&cfg.model_path, "ONNX model")?;
    let tokenizer_path = resolve_existing_path(&cfg.tokenizer_path, "tokenizer config")?;

    let session = Session::builder()
        .map_err(|e| map_ort_error("create session builder", e))?
        .commit_from_file(&model_path)
        .map_err(|e| map_ort_error("load ONNX model", e))?;

    let tokenizer =
        Tokenizer::from_file(&tokenizer_path).map_err(|e| OnnxEmbedderError::ProviderFailure(e.to_string()))?;

    let pad_id = tokenizer.token_to_id("<pad>").ok_or_else(|| {
        OnnxEmbedderError::InvalidConfiguration(format!(
            "tokenizer `{}` does not declare a `<pad>` token",
            tokenizer_path.display()
        ))
    })? as i64;

    Ok(ModelSession {
        session: Mutex::new(session),
        tokenizer: Arc::new(tokenizer),
        pad_id,
        dimension: cfg.dimension,
        max_input_tokens: cfg.max_input_tokens,
    })
}

impl ModelSession {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OnnxEmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings: Vec<Encoding> = texts
            .iter()
            .map(|t| self.tokenizer.encode(t.as_str(), true))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OnnxEmbedderError::ProviderFailure(e.to_string()))?;

        let max_len = encodings.iter().map(Encoding::len).max().unwrap_or(0);
        if max_len > self.max_input_tokens {
            return Err(OnnxEmbedderError::ProviderFailure(format!(
                "input exceeds max length of {} tokens, actual length: {max_len}",
                self.max_input_tokens
            )));
        }

        let batch = encodings.len();
        let mut input_ids = Array2::<i64>::zeros((batch, max_len));
        let mut attention_mask = Array2::<i64>::zeros((batch, max_len));
        let mut attention_rows: Vec<Vec<i64>> = Vec::with_capacity(batch);

        for (row, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            for (col, (&id, &m)) in ids.iter().zip(mask.iter()).enumerate() {
                input_ids[(row, col)] = id as i64;
                attention_mask[(row, col)] = m as i64;
            }
            for col in ids.len()..max_len {
                input_ids[(row, col)] = self.pad_id;
                attention_mask[(row, col)] = 0;
            }
            attention_rows.push((0..max_len).map(|c| attention_mask[(row, c)]).collect());
        }

        let input_ids_t = Tensor::from_array(input_ids).map_err(|e| map_ort_error("prepare input_ids", e))?;
        let attention_mask_t =
            Tensor::from_array(attention_mask).map_err(|e| map_ort_error("prepare attention_mask", e))?;

        let mut session = self.session.lock().expect("embedder session mutex poisoned");
        let outputs = session
            .run(ort::inputs![input_ids_t, attention_mask_t])
            .map_err(|e| map_ort_error("execute ONNX session", e))?;

        let output = &outputs[0];
        let (shape, data) =
            output.try_extract_tensor::<f32>().map_err(|e| map_ort_error("extract output tensor", e))?;
        if shape.len() != 3 {
            return Err(OnnxEmbedderError::ProviderFailure(format!(
                "model output must be rank-3 [batch, seq_len, hidden], got shape {:?}",
                shape
            )));
        }
        let out_batch: usize = shape[0].try_into().unwrap();
        let seq_len: usize = shape[1].try_into().unwrap();
        let hidden: usize = shape[2].try_into().unwrap();
        if out_batch != batch {
            return Err(OnnxEmbedderError::ProviderFailure(format!(
                "model returned batch size {out_batch}, expected {batch}"
            )));
        }

        let mut results = Vec::with_capacity(batch);
        for b in 0..batch {
            let mut sum = vec![0f32; hidden];
            let mut count = 0f32;
            for t in 0..seq_len {
                if attention_rows[b][t] == 1 {
                    let base = (b * seq_len + t) * hidden;
                    for h in 0..hidden {
                        sum[h] += data[base + h];
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                for v in &mut sum {
                    *v /= count;
                }
            }
            if sum.len() != self.dimension {
                return Err(OnnxEmbedderError::ProviderFailure(format!(
                    "pooled embedding dimension {} does not match configured dimension {}",
                    sum.len(),
                    self.dimension
                )));
            }
            results.push(sum);
        }
        Ok(results)
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, CollabError> {
        let session = self.model(model).map_err(to_collab_error)?;
        let texts = texts.to_vec();
        // ONNX inference is a blocking call; isolate it the way the teacher's
        // own `Mutex<Session>` guard does, off the async executor. The `Arc`
        // clone lets the closure outlive this call without borrowing `self`.
        let result = tokio::task::spawn_blocking(move || session.embed_batch(&texts));
        match result.await {
            Ok(inner) => inner.map_err(to_collab_error),
            Err(join_err) => Err(CollabError::Terminal(format!("embedder task panicked: {join_err}"))),
        }
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        self.models.get(model).map(|m| m.dimension)
    }
}

fn to_collab_error(e: OnnxEmbedderError) -> CollabError {
    corpus_collab::classify(e.to_string())
}

fn ensure_ort_initialized(runtime_library_path: &Path) -> Result<(), OnnxEmbedderError> {
    if let Some(existing) = ORT_RUNTIME_PATH.get() {
        if existing != runtime_library_path {
            return Err(OnnxEmbedderError::InvalidConfiguration(format!(
                "ONNX Runtime already initialized with library `{}`; cannot reinitialize with `{}`",
                existing.display(),
                runtime_library_path.display()
            )));
        }
    } else {
        let _ = ORT_RUNTIME_PATH.set(runtime_library_path.to_path_buf());
    }

    ort::init_from(runtime_library_path.to_string_lossy().to_string())
        .with_name("corpus-engine")
        .commit()
        .map_err(|e| map_ort_error("initialize ONNX Runtime environment", e))?;
    Ok(())
}

fn resolve_existing_path(path: &Path, description: &str) -> Result<PathBuf, OnnxEmbedderError> {
    fs::metadata(path)
        .map_err(|_| OnnxEmbedderError::InvalidConfiguration(format!("{description} `{}` does not exist", path.display())))?;
    path.canonicalize()
        .map_err(|e| OnnxEmbedderError::ProviderFailure(format!("failed to canonicalize {description}: {e}")))
}

fn map_ort_error(context: &str, err: OrtError) -> OnnxEmbedderError {
    OnnxEmbedderError::ProviderFailure(format!("{context} failed: {err}"))
}
