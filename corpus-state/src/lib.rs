//! Indexing-state snapshot (C11).
//!
//! Process-wide atomic counters plus a periodic JSON snapshot writer,
//! grounded on the teacher pack's `vyotiq-backend::indexer::IndexState`
//! (`AtomicBool`/`AtomicUsize` counters read with `Ordering::Relaxed`,
//! `is_indexing` with `Acquire`/`Release`) and its `save_content_hashes`
//! atomic temp-then-rename write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use corpus_store::{CorpusStats, SqliteStore, StoreError};

const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error writing snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// `running.mode` discriminant (spec.md §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingMode {
    Incremental,
    Full,
}

impl IndexingMode {
    fn as_str(self) -> &'static str {
        match self {
            IndexingMode::Incremental => "incremental",
            IndexingMode::Full => "full",
        }
    }
}

/// A point-in-time read of every counter, safe to serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub running: bool,
    pub mode: String,
    pub job_id: Option<String>,
    pub scanned: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub representations: u64,
    pub chunks_total: u64,
    pub embedded_ok: u64,
    pub errors: u64,
}

/// Process-wide indexing counters. One instance is shared (via `Arc`)
/// between the ingest loop, the embedding workers, and the snapshot
/// writer (spec.md §4.11).
#[derive(Debug, Default)]
pub struct IndexingState {
    running: AtomicBool,
    mode: Mutex<IndexingMode>,
    job_id: Mutex<Option<String>>,
    scanned: AtomicU64,
    indexed: AtomicU64,
    skipped: AtomicU64,
    deleted: AtomicU64,
    representations: AtomicU64,
    chunks_total: AtomicU64,
    embedded_ok: AtomicU64,
    errors: AtomicU64,
}

impl IndexingState {
    pub fn new() -> Self {
        Self { mode: Mutex::new(IndexingMode::Incremental), ..Default::default() }
    }

    pub fn begin_scan(&self, mode: IndexingMode, job_id: impl Into<String>) {
        *self.mode.lock().unwrap() = mode;
        *self.job_id.lock().unwrap() = Some(job_id.into());
        self.running.store(true, Ordering::Release);
    }

    pub fn end_scan(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> IndexingMode {
        *self.mode.lock().unwrap()
    }

    pub fn incr_scanned(&self) {
        self.scanned.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_indexed(&self) {
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_representations(&self) {
        self.representations.fetch_add(1, Ordering::Relaxed);
    }
    pub fn add_chunks_total(&self, n: u64) {
        self.chunks_total.fetch_add(n, Ordering::Relaxed);
    }
    pub fn incr_embedded_ok(&self) {
        self.embedded_ok.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically reads every counter into a plain struct.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            running: self.running.load(Ordering::Acquire),
            mode: self.mode().as_str().to_string(),
            job_id: self.job_id.lock().unwrap().clone(),
            scanned: self.scanned.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            representations: self.representations.load(Ordering::Relaxed),
            chunks_total: self.chunks_total.load(Ordering::Relaxed),
            embedded_ok: self.embedded_ok.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// The JSON document written to `<state>/corpus.json`: live counters
/// overlaid on the store's own aggregate view (spec.md §4.11's
/// `corpus_stats` composition).
#[derive(Debug, Serialize)]
pub struct CorpusSnapshot {
    #[serde(flatten)]
    pub state: StateSnapshot,
    pub stats: CorpusStats,
}

/// Writes `corpus.json` atomically (temp file + rename) so concurrent
/// readers never observe a partial file, mirroring
/// `vyotiq-backend::indexer::save_content_hashes`.
pub fn write_snapshot_file(path: &Path, snapshot: &CorpusSnapshot) -> Result<(), StateError> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Periodic background writer composing [`IndexingState`] with
/// [`corpus_store::SqliteStore::corpus_stats`] into `corpus.json`.
pub struct SnapshotWriter {
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf) -> Self {
        Self::with_interval(path, DEFAULT_SNAPSHOT_INTERVAL)
    }

    pub fn with_interval(path: PathBuf, interval: Duration) -> Self {
        Self { path, interval, cancel: CancellationToken::new(), worker: Mutex::new(None) }
    }

    /// Spawns the ticker. `store`/`state` must outlive the writer
    /// (callers pass `Arc` clones).
    pub fn start(&self, state: std::sync::Arc<IndexingState>, store: std::sync::Arc<SqliteStore>) {
        let path = self.path.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = write_once(&path, &state, &store) {
                            tracing::warn!(error = %e, "failed to write corpus snapshot");
                        }
                    }
                }
            }
        });
        *self.worker.lock().unwrap() = Some(join);
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().unwrap().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }
}

fn write_once(path: &Path, state: &IndexingState, store: &SqliteStore) -> Result<(), StateError> {
    let stats = store.corpus_stats()?;
    let snapshot = CorpusSnapshot { state: state.snapshot(), stats };
    write_snapshot_file(path, &snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_reflects_counters() {
        let state = IndexingState::new();
        state.begin_scan(IndexingMode::Full, "job-1");
        state.incr_scanned();
        state.incr_scanned();
        state.incr_errors();
        let snap = state.snapshot();
        assert!(snap.running);
        assert_eq!(snap.mode, "full");
        assert_eq!(snap.job_id.as_deref(), Some("job-1"));
        assert_eq!(snap.scanned, 2);
        assert_eq!(snap.errors, 1);

        state.end_scan();
        assert!(!state.snapshot().running);
    }

    #[test]
    fn write_snapshot_file_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let store = SqliteStore::open_in_memory().unwrap();
        let state = IndexingState::new();
        state.incr_scanned();

        write_once(&path, &state, &store).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["scanned"], 1);
        assert_eq!(parsed["documents_total"], 0);
    }

    #[tokio::test]
    async fn snapshot_writer_ticks_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let state = Arc::new(IndexingState::new());

        let writer = SnapshotWriter::with_interval(path.clone(), Duration::from_millis(20));
        writer.start(state, store);
        tokio::time::sleep(Duration::from_millis(60)).await;
        writer.stop().await;
        assert!(path.exists());
    }
}
