//! Embedding worker (C9): one instance per `index_kind`, pulling pending
//! chunks from the store, embedding them, and writing vectors into the
//! ANN index.
//!
//! Grounded on the retry/backoff shape spec.md §4.9 spells out directly
//! and on `hjinco-mdit`'s `segment_sync` module's touch-only-what-changed
//! update pattern (generalized here from "resync one document's segments"
//! to "drain one batch of pending chunks").

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use corpus_collab::{CollabError, Embedder};
use corpus_model::{ChunkId, DocType, IndexKind, RepType, Span};
use corpus_store::{AnnIndex, SqliteStore, StoreError};

const MARK_EMBEDDED_BACKOFF: [Duration; 3] =
    [Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)];
const DEFAULT_BATCH_SIZE: u32 = 32;
const DEFAULT_TICK: Duration = Duration::from_secs(2);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invariant violation (e.g. a non-positive `chunk_id`) or an
    /// explicit fatal sentinel from a collaborator. Non-retryable; the
    /// `run` loop terminates.
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("collaborator error: {0}")]
    Collab(#[from] CollabError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkerError {
    /// Transient collaborator errors (timeout, rate limit, cancellation)
    /// preserve pending state and should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkerError::Collab(c) if c.is_transient())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }
}

/// Enough of a chunk's metadata for the retrieval service's
/// label→metadata cache to apply filters and render a hit without a
/// second store round-trip (spec.md §4.9 step 9, §9's "Cross-component
/// callbacks").
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub chunk_id: ChunkId,
    pub rel_path: String,
    pub doc_type: DocType,
    pub rep_type: RepType,
    pub text: String,
    pub spans: Vec<Span>,
}

/// Result of one successful `run_once` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub attempted: usize,
    pub embedded: usize,
}

/// Per-worker configuration; one of these exists per `IndexKind` since
/// `next_pending`'s concurrency correctness depends on construction-time
/// partitioning by kind (spec.md §9).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub index_kind: IndexKind,
    pub model: String,
    pub batch_size: u32,
    pub tick_interval: Duration,
    pub max_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(index_kind: IndexKind, model: impl Into<String>) -> Self {
        Self {
            index_kind,
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            tick_interval: DEFAULT_TICK,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Runs exactly one drain of up to `cfg.batch_size` pending chunks
/// (spec.md §4.9's numbered steps). `on_indexed_chunk` is invoked once
/// per chunk that was both added to the ANN index and durably marked
/// embedded.
pub async fn run_once(
    store: &SqliteStore,
    ann: &AnnIndex,
    embedder: &dyn Embedder,
    cfg: &WorkerConfig,
    cancel: &CancellationToken,
    mut on_indexed_chunk: impl FnMut(u64, ChunkMetadata),
) -> Result<WorkerOutcome, WorkerError> {
    let pending = store.next_pending(cfg.batch_size, cfg.index_kind)?;
    if pending.is_empty() {
        return Ok(WorkerOutcome::default());
    }

    for task in &pending {
        if task.chunk.chunk_id.0 == 0 {
            return Err(WorkerError::Fatal(format!("invalid chunk_id for rep {}", task.chunk.rep_id.0)));
        }
    }

    let labels: Vec<ChunkId> = pending.iter().map(|p| p.chunk.chunk_id).collect();
    let texts: Vec<String> = pending.iter().map(|p| p.chunk.text.clone()).collect();

    let vectors = match embedder.embed(&cfg.model, &texts).await {
        Ok(v) => v,
        Err(e) => {
            if e.is_transient() {
                return Err(e.into());
            }
            store.mark_failed(&labels, &e.to_string())?;
            return Err(e.into());
        }
    };

    if vectors.len() != pending.len() {
        store.mark_failed(&labels, "count mismatch")?;
        return Err(WorkerError::Collab(CollabError::Terminal("count mismatch".into())));
    }

    for (i, (task, vector)) in pending.iter().zip(vectors.iter()).enumerate() {
        if let Err(e) = ann.add(task.chunk.chunk_id.0, vector) {
            let embedded_labels: Vec<ChunkId> = labels[..i].to_vec();
            if !embedded_labels.is_empty() {
                store.mark_embedded(&embedded_labels)?;
            }
            store.mark_failed(&[task.chunk.chunk_id], &e.to_string())?;
            tracing::warn!(
                chunk_id = task.chunk.chunk_id.0,
                embedded = embedded_labels.len(),
                error = %e,
                "ann add failed mid-batch"
            );
            return Ok(WorkerOutcome { attempted: pending.len(), embedded: embedded_labels.len() });
        }
    }

    mark_embedded_with_retry(store, &labels, cancel).await?;

    for task in &pending {
        on_indexed_chunk(
            task.chunk.chunk_id.0,
            ChunkMetadata {
                chunk_id: task.chunk.chunk_id,
                rel_path: task.chunk.rel_path.clone(),
                doc_type: task.chunk.doc_type,
                rep_type: task.chunk.rep_type,
                text: task.chunk.text.clone(),
                spans: task.spans.clone(),
            },
        );
    }

    Ok(WorkerOutcome { attempted: pending.len(), embedded: pending.len() })
}

/// Retries `mark_embedded` up to 3 times with the 100/200/400 ms backoff
/// spec.md §4.9 step 8 specifies, aborting the wait on cancellation.
async fn mark_embedded_with_retry(
    store: &SqliteStore,
    labels: &[ChunkId],
    cancel: &CancellationToken,
) -> Result<(), WorkerError> {
    for (attempt, backoff) in MARK_EMBEDDED_BACKOFF.iter().enumerate() {
        match store.mark_embedded(labels) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "mark_embedded failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WorkerError::Collab(CollabError::Cancelled)),
                    _ = tokio::time::sleep(*backoff) => {}
                }
            }
        }
    }
    store.mark_embedded(labels).map_err(WorkerError::Store)
}

/// Wraps [`run_once`] in a ticker with exponential backoff on retryable
/// errors (up to `cfg.max_backoff`), exiting on a fatal error or
/// cancellation.
pub async fn run(
    store: Arc<SqliteStore>,
    ann: Arc<AnnIndex>,
    embedder: Arc<dyn Embedder>,
    cfg: WorkerConfig,
    cancel: CancellationToken,
    mut on_indexed_chunk: impl FnMut(u64, ChunkMetadata) + Send,
) {
    let mut backoff = cfg.tick_interval;
    let mut ticker = tokio::time::interval(cfg.tick_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(index_kind = ?cfg.index_kind, "embed worker cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        match run_once(&store, &ann, embedder.as_ref(), &cfg, &cancel, &mut on_indexed_chunk).await {
            Ok(outcome) => {
                if outcome.attempted > 0 {
                    tracing::debug!(index_kind = ?cfg.index_kind, embedded = outcome.embedded, "embed batch complete");
                }
                backoff = cfg.tick_interval;
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(index_kind = ?cfg.index_kind, error = %e, "embed worker terminating");
                return;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(index_kind = ?cfg.index_kind, error = %e, backoff = ?backoff, "retryable error, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(cfg.max_backoff);
            }
            Err(e) => {
                tracing::warn!(index_kind = ?cfg.index_kind, error = %e, "non-fatal embed error, continuing");
                backoff = cfg.tick_interval;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corpus_model::{ChunkDraft, DocStatus, Document, RepId, Representation, SourceType};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    struct StubEmbedder {
        response: Mutex<Box<dyn FnMut(&[String]) -> Result<Vec<Vec<f32>>, CollabError> + Send>>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, CollabError> {
            (self.response.lock().await)(texts)
        }
    }

    fn seed_pending_chunk(store: &SqliteStore) -> ChunkId {
        let doc = Document::new("a.txt", DocType::Text, SourceType::Filesystem, 5, 0, "h", DocStatus::Ok).unwrap();
        let doc_id = store.upsert_document(&doc).unwrap();
        let rep_id = store
            .upsert_representation(&Representation {
                rep_id: RepId(0),
                doc_id,
                rep_type: RepType::RawText,
                rep_hash: "h".into(),
                created_unix: 0,
                deleted: false,
            })
            .unwrap();
        let draft = ChunkDraft::new(0, "hello world", vec![Span::Lines { start_line: 1, end_line: 1 }]).unwrap();
        store.insert_chunk_with_spans(rep_id, &draft, IndexKind::Text, "a.txt", DocType::Text, RepType::RawText).unwrap()
    }

    #[tokio::test]
    async fn run_once_embeds_pending_chunk_and_invokes_callback() {
        let store = SqliteStore::open_in_memory().unwrap();
        let chunk_id = seed_pending_chunk(&store);
        let ann = AnnIndex::new();
        let embedder = StubEmbedder { response: Mutex::new(Box::new(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()))) };
        let cfg = WorkerConfig::new(IndexKind::Text, "text-model");
        let cancel = CancellationToken::new();

        let seen = StdMutex::new(Vec::new());
        let outcome = run_once(&store, &ann, &embedder, &cfg, &cancel, |label, meta| {
            seen.lock().unwrap().push((label, meta.rel_path));
        })
        .await
        .unwrap();

        assert_eq!(outcome, WorkerOutcome { attempted: 1, embedded: 1 });
        assert_eq!(seen.lock().unwrap().as_slice(), &[(chunk_id.0, "a.txt".to_string())]);
        assert_eq!(ann.len(), 1);
        assert_eq!(store.corpus_stats().unwrap().chunks_embedded, 1);
    }

    #[tokio::test]
    async fn transient_embedder_error_leaves_chunk_pending() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_pending_chunk(&store);
        let ann = AnnIndex::new();
        let embedder =
            StubEmbedder { response: Mutex::new(Box::new(|_| Err(corpus_collab::classify("rate limit exceeded")))) };
        let cfg = WorkerConfig::new(IndexKind::Text, "text-model");
        let cancel = CancellationToken::new();

        let err = run_once(&store, &ann, &embedder, &cfg, &cancel, |_, _| {}).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.corpus_stats().unwrap().chunks_pending, 1);
        assert_eq!(store.corpus_stats().unwrap().chunks_failed, 0);
    }

    #[tokio::test]
    async fn terminal_embedder_error_marks_chunk_failed() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_pending_chunk(&store);
        let ann = AnnIndex::new();
        let embedder = StubEmbedder {
            response: Mutex::new(Box::new(|_| Err(corpus_collab::classify("400 bad request: invalid input")))),
        };
        let cfg = WorkerConfig::new(IndexKind::Text, "text-model");
        let cancel = CancellationToken::new();

        let err = run_once(&store, &ann, &embedder, &cfg, &cancel, |_, _| {}).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(store.corpus_stats().unwrap().chunks_failed, 1);
    }

    #[tokio::test]
    async fn count_mismatch_marks_whole_batch_failed() {
        let store = SqliteStore::open_in_memory().unwrap();
        seed_pending_chunk(&store);
        let ann = AnnIndex::new();
        let embedder = StubEmbedder { response: Mutex::new(Box::new(|_| Ok(Vec::new()))) };
        let cfg = WorkerConfig::new(IndexKind::Text, "text-model");
        let cancel = CancellationToken::new();

        run_once(&store, &ann, &embedder, &cfg, &cancel, |_, _| {}).await.unwrap_err();
        assert_eq!(store.corpus_stats().unwrap().chunks_failed, 1);
    }
}
