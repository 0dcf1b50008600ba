//! Retrieval Service (C10): embeds a query, searches one or both ANN
//! indices, filters/dedupes/normalizes hits, hydrates chunk metadata, and
//! assembles RAG prompts.
//!
//! Grounded directly on `hybrid-service/src/lib.rs`'s `search_hybrid`
//! (query embed → per-index ANN search → merge/dedupe/normalize →
//! hydrate records), adapted from FTS+HNSW fusion to text-ANN + code-ANN
//! fusion per spec.md §4.10, plus `ask`/`open_file`/`stats`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use globset::Glob;
use parking_lot::RwLock;
use thiserror::Error;

use corpus_collab::{CollabError, Embedder, Generator};
use corpus_embed_worker::ChunkMetadata;
use corpus_model::{normalize_rel_path, DocType, IndexKind, ModelError, Span};
use corpus_state::{CorpusSnapshot, IndexingState};
use corpus_store::{AnnIndex, SqliteStore, StoreError};

const DEFAULT_K: usize = 10;
const DEFAULT_OVERFETCH_MULTIPLIER: usize = 5;
const DEFAULT_MAX_CONTEXT_CHARS: usize = 20_000;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("query text must not be empty")]
    EmptyQuery,
    #[error("k must be >= 1")]
    InvalidK,
    #[error("invalid rel_path: {0}")]
    InvalidPath(#[from] ModelError),
    #[error("invalid file_glob: {0}")]
    InvalidGlob(#[from] globset::Error),
    #[error("collaborator error: {0}")]
    Collab(#[from] CollabError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which ANN index (or both) a query targets (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSelector {
    Text,
    Code,
    Both,
    Auto,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub k: usize,
    pub path_prefix: Option<String>,
    pub file_glob: Option<String>,
    pub doc_types: Option<Vec<DocType>>,
    pub index: IndexSelector,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), k: DEFAULT_K, path_prefix: None, file_glob: None, doc_types: None, index: IndexSelector::Auto }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub rel_path: String,
    pub doc_type: DocType,
    pub text: String,
    pub spans: Vec<Span>,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct AskResult {
    pub answer: String,
    pub citations: Vec<(String, Span)>,
    pub hits: Vec<SearchHit>,
    pub indexing_complete: bool,
}

/// Label→metadata cache updated by the embedding worker's
/// `on_indexed_chunk` callback and read by retrieval (spec.md §9's
/// "Cross-component callbacks" pattern, sharded one instance per
/// `IndexKind` to avoid contention per spec.md §5).
#[derive(Default)]
pub struct LabelMetadataCache {
    inner: RwLock<HashMap<u64, ChunkMetadata>>,
}

impl LabelMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, label: u64, metadata: ChunkMetadata) {
        self.inner.write().insert(label, metadata);
    }

    pub fn remove(&self, label: u64) {
        self.inner.write().remove(&label);
    }

    pub fn get(&self, label: u64) -> Option<ChunkMetadata> {
        self.inner.read().get(&label).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct RetrieveConfig {
    pub k_default: usize,
    pub overfetch_multiplier: usize,
    pub max_context_chars: usize,
    pub embed_text_model: String,
    pub embed_code_model: String,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            k_default: DEFAULT_K,
            overfetch_multiplier: DEFAULT_OVERFETCH_MULTIPLIER,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            embed_text_model: "embed-text".to_string(),
            embed_code_model: "embed-code".to_string(),
        }
    }
}

pub struct RetrievalService<'a> {
    pub store: &'a SqliteStore,
    pub ann_text: &'a AnnIndex,
    pub ann_code: &'a AnnIndex,
    pub cache_text: &'a LabelMetadataCache,
    pub cache_code: &'a LabelMetadataCache,
    pub embedder: &'a dyn Embedder,
    pub generator: Option<&'a dyn Generator>,
    pub config: RetrieveConfig,
}

impl<'a> RetrievalService<'a> {
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, RetrieveError> {
        if query.text.trim().is_empty() {
            return Err(RetrieveError::EmptyQuery);
        }
        if query.k == 0 {
            return Err(RetrieveError::InvalidK);
        }

        let selector = match query.index {
            IndexSelector::Auto if is_code_ish(&query.text) => IndexSelector::Code,
            IndexSelector::Auto => IndexSelector::Text,
            other => other,
        };

        let overfetch = overfetch_k(query.k, self.config.overfetch_multiplier);
        let mut hits: Vec<SearchHit> = Vec::new();
        let is_both = selector == IndexSelector::Both;

        if matches!(selector, IndexSelector::Text | IndexSelector::Both) {
            let vector = self.embedder.embed(&self.config.embed_text_model, &[query.text.clone()]).await?;
            let vector = vector.into_iter().next().unwrap_or_default();
            hits.extend(self.search_one(&vector, overfetch, self.ann_text, self.cache_text, is_both));
        }
        if matches!(selector, IndexSelector::Code | IndexSelector::Both) {
            let vector = self.embedder.embed(&self.config.embed_code_model, &[query.text.clone()]).await?;
            let vector = vector.into_iter().next().unwrap_or_default();
            hits.extend(self.search_one(&vector, overfetch, self.ann_code, self.cache_code, is_both));
        }

        let mut hits = apply_filters(hits, query)?;

        if is_both {
            let mut seen = std::collections::HashSet::new();
            hits.retain(|h| seen.insert(h.chunk_id));
        }

        hits.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(query.k);
        Ok(hits)
    }

    fn search_one(
        &self,
        vector: &[f32],
        overfetch: usize,
        ann: &AnnIndex,
        cache: &LabelMetadataCache,
        normalize: bool,
    ) -> Vec<SearchHit> {
        ann.search(vector, overfetch)
            .into_iter()
            .filter_map(|(label, score)| {
                let meta = cache.get(label)?;
                let score = if normalize { (score + 1.0) / 2.0 } else { score };
                Some(SearchHit {
                    chunk_id: label,
                    rel_path: meta.rel_path,
                    doc_type: meta.doc_type,
                    text: meta.text,
                    spans: meta.spans,
                    score,
                })
            })
            .collect()
    }

    /// Runs `search`, composes a RAG prompt from the top hits, and calls
    /// the generator collaborator if one is configured.
    pub async fn ask(&self, question: &str, state: Option<&IndexingState>) -> Result<AskResult, RetrieveError> {
        let query = SearchQuery::new(question);
        let hits = self.search(&query).await?;
        let indexing_complete = state.map(|s| !s.is_running()).unwrap_or(true);

        let Some(generator) = self.generator else {
            return Ok(AskResult { answer: String::new(), citations: Vec::new(), hits, indexing_complete });
        };

        let mut context = String::new();
        let mut citations = Vec::new();
        for hit in &hits {
            let span = hit.spans.first().cloned().unwrap_or(Span::Lines { start_line: 0, end_line: 0 });
            let snippet = format!("# {} ({:?})\n{}\n\n", hit.rel_path, span, hit.text);
            if context.len() + snippet.len() > self.config.max_context_chars {
                let remaining = self.config.max_context_chars.saturating_sub(context.len());
                context.push_str(&snippet[..remaining.min(snippet.len())]);
                break;
            }
            context.push_str(&snippet);
            citations.push((hit.rel_path.clone(), span));
        }

        let prompt = format!("{context}\n\nQuestion: {question}\n");
        let answer = generator.generate(&prompt).await?;
        Ok(AskResult { answer, citations, hits, indexing_complete })
    }

    /// Reads up to `max_chars` bytes of `rel_path` at `span`, validated
    /// the same way the store validates every rel_path boundary.
    pub fn open_file(&self, root: &Path, rel_path: &str, span: Option<&Span>, max_chars: usize) -> Result<String, RetrieveError> {
        let normalized = normalize_rel_path(rel_path)?;
        let abs_path = resolve_under_root(root, &normalized)?;
        let contents = std::fs::read_to_string(abs_path)?;

        let selected = match span {
            Some(Span::Lines { start_line, end_line }) => {
                let lines: Vec<&str> = contents.lines().collect();
                let start = (*start_line as usize).saturating_sub(1);
                let end = (*end_line as usize).min(lines.len());
                lines.get(start..end).map(|s| s.join("\n")).unwrap_or_default()
            }
            _ => contents,
        };

        Ok(selected.chars().take(max_chars).collect())
    }

    pub fn stats(&self, state: &IndexingState) -> Result<CorpusSnapshot, RetrieveError> {
        let stats = self.store.corpus_stats()?;
        Ok(CorpusSnapshot { state: state.snapshot(), stats })
    }
}

fn resolve_under_root(root: &Path, rel_path: &str) -> Result<PathBuf, RetrieveError> {
    let candidate = root.join(rel_path);
    if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RetrieveError::InvalidPath(ModelError::PathTraversal(rel_path.to_string())));
    }
    Ok(candidate)
}

fn overfetch_k(k: usize, multiplier: usize) -> usize {
    k.checked_mul(multiplier).unwrap_or(usize::MAX).max(1)
}

fn apply_filters(hits: Vec<SearchHit>, query: &SearchQuery) -> Result<Vec<SearchHit>, RetrieveError> {
    let glob = query.file_glob.as_deref().map(Glob::new).transpose()?.map(|g| g.compile_matcher());

    Ok(hits
        .into_iter()
        .filter(|h| query.doc_types.as_ref().map(|types| types.contains(&h.doc_type)).unwrap_or(true))
        .filter(|h| query.path_prefix.as_ref().map(|p| h.rel_path.starts_with(p.as_str())).unwrap_or(true))
        .filter(|h| glob.as_ref().map(|g| g.is_match(&h.rel_path)).unwrap_or(true))
        .collect())
}

/// Heuristic "is this query code-ish" classifier for `index=auto`. Pins a
/// representative subset of signals (fenced code blocks, backticks, and
/// common code punctuation/keywords) rather than attempting an exhaustive
/// language detector, per spec.md §9's Open Question on this exact point.
fn is_code_ish(text: &str) -> bool {
    const CODE_TOKENS: &[&str] =
        &["```", "fn ", "def ", "class ", "import ", "public ", "=>", "->", "::", "{}", ");", "self."];
    if text.contains('`') {
        return true;
    }
    CODE_TOKENS.iter().any(|t| text.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corpus_model::RepType;

    struct StubEmbedder;
    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, CollabError> {
            let base = if model.contains("code") { 0.0 } else { 1.0 };
            Ok(texts.iter().map(|_| vec![base, 1.0 - base]).collect())
        }
    }

    fn sample_meta(chunk_id: u64, rel_path: &str, doc_type: DocType) -> ChunkMetadata {
        ChunkMetadata {
            chunk_id: corpus_model::ChunkId(chunk_id),
            rel_path: rel_path.to_string(),
            doc_type,
            rep_type: RepType::RawText,
            text: "alpha beta".to_string(),
            spans: vec![Span::Lines { start_line: 1, end_line: 1 }],
        }
    }

    #[tokio::test]
    async fn search_text_returns_hydrated_hits() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ann_text = AnnIndex::new();
        let ann_code = AnnIndex::new();
        ann_text.add(1, &[1.0, 0.0]).unwrap();
        let cache_text = LabelMetadataCache::new();
        cache_text.insert(1, sample_meta(1, "docs/a.md", DocType::Md));
        let cache_code = LabelMetadataCache::new();
        let embedder = StubEmbedder;

        let service = RetrievalService {
            store: &store,
            ann_text: &ann_text,
            ann_code: &ann_code,
            cache_text: &cache_text,
            cache_code: &cache_code,
            embedder: &embedder,
            generator: None,
            config: RetrieveConfig::default(),
        };

        let mut query = SearchQuery::new("alpha");
        query.index = IndexSelector::Text;
        let hits = service.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rel_path, "docs/a.md");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_both_dedupes_and_normalizes_scores() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ann_text = AnnIndex::new();
        let ann_code = AnnIndex::new();
        ann_text.add(1, &[1.0, 0.0]).unwrap();
        ann_code.add(1, &[1.0, 0.0]).unwrap();
        let cache_text = LabelMetadataCache::new();
        cache_text.insert(1, sample_meta(1, "docs/a.md", DocType::Md));
        let cache_code = LabelMetadataCache::new();
        cache_code.insert(1, sample_meta(1, "docs/a.md", DocType::Md));
        let embedder = StubEmbedder;

        let service = RetrievalService {
            store: &store,
            ann_text: &ann_text,
            ann_code: &ann_code,
            cache_text: &cache_text,
            cache_code: &cache_code,
            embedder: &embedder,
            generator: None,
            config: RetrieveConfig::default(),
        };

        let mut query = SearchQuery::new("alpha");
        query.index = IndexSelector::Both;
        let hits = service.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score >= 0.0 && hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn missing_metadata_drops_the_label() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ann_text = AnnIndex::new();
        let ann_code = AnnIndex::new();
        ann_text.add(99, &[1.0, 0.0]).unwrap();
        let cache_text = LabelMetadataCache::new();
        let cache_code = LabelMetadataCache::new();
        let embedder = StubEmbedder;

        let service = RetrievalService {
            store: &store,
            ann_text: &ann_text,
            ann_code: &ann_code,
            cache_text: &cache_text,
            cache_code: &cache_code,
            embedder: &embedder,
            generator: None,
            config: RetrieveConfig::default(),
        };

        let mut query = SearchQuery::new("alpha");
        query.index = IndexSelector::Text;
        let hits = service.search(&query).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn overfetch_clamps_on_overflow() {
        assert_eq!(overfetch_k(usize::MAX, 5), usize::MAX);
        assert_eq!(overfetch_k(2, 5), 10);
        assert_eq!(overfetch_k(0, 5), 0); // k=0 rejected before reaching here; defensive floor only
    }

    #[test]
    fn code_ish_heuristic_flags_fenced_blocks_and_keywords() {
        assert!(is_code_ish("```rust\nfn main() {}\n```"));
        assert!(is_code_ish("how does self.foo work"));
        assert!(!is_code_ish("what is the capital of France"));
    }
}
