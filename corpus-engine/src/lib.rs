//! Top-level facade wiring C1-C11 together: one `SqliteStore`, one ANN
//! index + embedding worker per `IndexKind`, a persistence ticker, a
//! snapshot writer, and a `RetrievalService`.
//!
//! `CorpusConfig` transcribes spec.md §6's configuration table verbatim
//! into a single immutable struct assembled once at startup (spec.md
//! §9's "Configuration layering" note); building it from flags/env/file
//! is left to the CLI driver, which is out of core scope per spec.md §1.
//! Loop orchestration follows the teacher's `hybrid-orchestrator` binary
//! (embedder + store + indexes wired up once, driven by a small command
//! surface) generalized from a one-shot CLI into long-running tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use corpus_collab::{CollabError, Embedder, Generator, Ocr, Transcriber};
use corpus_discovery::DiscoveryConfig;
use corpus_ingest::{run_scan, IngestConfig, ScanReport};
use corpus_model::IndexKind;
use corpus_represent::{CachePolicyConfig, ChunkingConfig, ContentCache};
use corpus_retrieve::{LabelMetadataCache, RetrievalService, RetrieveConfig};
use corpus_state::{IndexingMode, IndexingState, SnapshotWriter};
use corpus_store::{AnnIndex, IndexHandle, PersistenceManager, SqliteStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("ingest error: {0}")]
    Ingest(#[from] corpus_ingest::IngestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence error: {0}")]
    Persistence(#[from] corpus_store::PersistenceError),
    #[error("scan task panicked: {0}")]
    ScanTask(String),
}

/// Immutable configuration assembled once at startup, shape per spec.md
/// §6's "Configuration" table.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    pub root_dir: PathBuf,
    pub state_dir: PathBuf,
    pub max_file_mb: u64,
    pub follow_symlinks: bool,
    pub use_gitignore: bool,
    pub path_excludes: Vec<String>,
    pub secret_patterns: Vec<String>,
    pub embed_text_model: String,
    pub embed_code_model: String,
    pub chat_model: String,
    pub ocr_model: String,
    pub stt_provider: SttProvider,
    pub rag: RagConfig,
    pub chunking: ChunkingConfig,
    pub persistence_autosave_interval_seconds: u64,
    pub ocr_cache_max_bytes: u64,
    pub ocr_cache_ttl_seconds: u64,
    pub ocr_cache_prune_every: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Auto,
    Mistral,
    ElevenLabs,
    Off,
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub k_default: usize,
    pub overfetch_multiplier: usize,
    pub max_context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { k_default: 10, overfetch_multiplier: 5, max_context_chars: 20_000 }
    }
}

impl CorpusConfig {
    pub fn new(root_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            state_dir: state_dir.into(),
            max_file_mb: 50,
            follow_symlinks: false,
            use_gitignore: true,
            path_excludes: Vec::new(),
            secret_patterns: Vec::new(),
            embed_text_model: "embed-text".to_string(),
            embed_code_model: "embed-code".to_string(),
            chat_model: "chat".to_string(),
            ocr_model: "ocr".to_string(),
            stt_provider: SttProvider::Auto,
            rag: RagConfig::default(),
            chunking: ChunkingConfig::default(),
            persistence_autosave_interval_seconds: 15,
            ocr_cache_max_bytes: 512 * 1024 * 1024,
            ocr_cache_ttl_seconds: 30 * 24 * 3600,
            ocr_cache_prune_every: 1,
        }
    }

    fn meta_path(&self) -> PathBuf {
        self.state_dir.join("meta.sqlite")
    }

    fn text_index_path(&self) -> PathBuf {
        self.state_dir.join("vectors_text.hnsw")
    }

    fn code_index_path(&self) -> PathBuf {
        self.state_dir.join("vectors_code.hnsw")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("corpus.json")
    }

    fn ocr_cache_dir(&self) -> PathBuf {
        self.state_dir.join("cache").join("ocr")
    }

    fn transcribe_cache_dir(&self) -> PathBuf {
        self.state_dir.join("cache").join("transcribe")
    }

    fn discovery_config(&self) -> DiscoveryConfig {
        let mut discovery = DiscoveryConfig::new(&self.root_dir);
        discovery.max_size_bytes = self.max_file_mb * 1024 * 1024;
        discovery.follow_symlinks = self.follow_symlinks;
        discovery.use_gitignore = self.use_gitignore;
        discovery.path_excludes = self.path_excludes.clone();
        discovery
    }

    fn cache_policy(&self) -> CachePolicyConfig {
        CachePolicyConfig {
            max_bytes: self.ocr_cache_max_bytes,
            ttl: Duration::from_secs(self.ocr_cache_ttl_seconds),
            prune_every: self.ocr_cache_prune_every,
        }
    }
}

/// Background task handles owned by a running `CorpusEngine`.
struct RunningTasks {
    worker_text: JoinHandle<()>,
    worker_code: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Bundles C1-C11 into one long-lived object: the metadata store, both
/// ANN indexes, both label caches, the embedding workers, the
/// persistence/snapshot tickers, and the retrieval surface.
pub struct CorpusEngine {
    config: CorpusConfig,
    store: Arc<SqliteStore>,
    ann_text: Arc<AnnIndex>,
    ann_code: Arc<AnnIndex>,
    cache_text: Arc<LabelMetadataCache>,
    cache_code: Arc<LabelMetadataCache>,
    state: Arc<IndexingState>,
    persistence: PersistenceManager,
    snapshot: SnapshotWriter,
    embedder: Arc<dyn Embedder>,
    ocr: Option<Arc<dyn Ocr>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Option<Arc<dyn Generator>>,
    ocr_cache: ContentCache,
    transcript_cache: ContentCache,
    running: std::sync::Mutex<Option<RunningTasks>>,
}

impl CorpusEngine {
    /// Opens (or creates) the on-disk store and indexes at
    /// `config.state_dir`, loading any existing ANN snapshots.
    pub fn open(
        config: CorpusConfig,
        embedder: Arc<dyn Embedder>,
        ocr: Option<Arc<dyn Ocr>>,
        transcriber: Option<Arc<dyn Transcriber>>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.state_dir)?;
        std::fs::create_dir_all(config.ocr_cache_dir())?;
        std::fs::create_dir_all(config.transcribe_cache_dir())?;

        let store = Arc::new(SqliteStore::open(&config.meta_path())?);

        let ann_text = Arc::new(AnnIndex::new());
        let ann_code = Arc::new(AnnIndex::new());
        if config.text_index_path().exists() {
            ann_text.load(&config.text_index_path())?;
        }
        if config.code_index_path().exists() {
            ann_code.load(&config.code_index_path())?;
        }

        let handles = vec![
            IndexHandle::new("vectors_text", config.text_index_path(), ann_text.clone()),
            IndexHandle::new("vectors_code", config.code_index_path(), ann_code.clone()),
        ];
        let persistence = PersistenceManager::with_interval(
            handles,
            Duration::from_secs(config.persistence_autosave_interval_seconds),
        );
        let snapshot = SnapshotWriter::new(config.snapshot_path());

        let ocr_cache = ContentCache::new(config.ocr_cache_dir(), config.cache_policy());
        let transcript_cache = ContentCache::new(config.transcribe_cache_dir(), config.cache_policy());

        Ok(Self {
            config,
            store,
            ann_text,
            ann_code,
            cache_text: Arc::new(LabelMetadataCache::new()),
            cache_code: Arc::new(LabelMetadataCache::new()),
            state: Arc::new(IndexingState::new()),
            persistence,
            snapshot,
            embedder,
            ocr,
            transcriber,
            generator,
            ocr_cache,
            transcript_cache,
            running: std::sync::Mutex::new(None),
        })
    }

    /// Starts the persistence ticker, the snapshot writer, and one
    /// embedding-worker loop per `IndexKind` (spec.md §5: "at most one
    /// worker per kind"). Does not start an ingest scan; call
    /// `start_scan` for that, separately, since scans are one-shot or
    /// caller-scheduled rather than an always-on loop.
    pub fn start(&self) {
        self.persistence.start();
        self.snapshot.start(self.state.clone(), self.store.clone());

        let cancel = CancellationToken::new();

        let worker_text = tokio::spawn(corpus_embed_worker::run(
            self.store.clone(),
            self.ann_text.clone(),
            self.embedder.clone(),
            corpus_embed_worker::WorkerConfig::new(IndexKind::Text, self.config.embed_text_model.clone()),
            cancel.clone(),
            {
                let cache = self.cache_text.clone();
                let state = self.state.clone();
                move |label, meta| {
                    cache.insert(label, meta);
                    state.incr_embedded_ok();
                }
            },
        ));
        let worker_code = tokio::spawn(corpus_embed_worker::run(
            self.store.clone(),
            self.ann_code.clone(),
            self.embedder.clone(),
            corpus_embed_worker::WorkerConfig::new(IndexKind::Code, self.config.embed_code_model.clone()),
            cancel.clone(),
            {
                let cache = self.cache_code.clone();
                let state = self.state.clone();
                move |label, meta| {
                    cache.insert(label, meta);
                    state.incr_embedded_ok();
                }
            },
        ));

        *self.running.lock().unwrap() = Some(RunningTasks { worker_text, worker_code, cancel });
    }

    /// Runs one ingest scan on a dedicated blocking task (spec.md §5:
    /// ingest walks the filesystem synchronously, so it is isolated from
    /// the workers' async runtime rather than sharing it).
    pub async fn run_scan_once(&self, mode: IndexingMode) -> Result<ScanReport, EngineError> {
        let job_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| format!("scan-{}", d.as_millis()))
            .unwrap_or_else(|_| "scan-0".to_string());
        self.state.begin_scan(mode, job_id);
        let store = self.store.clone();
        let state = self.state.clone();
        let discovery = self.config.discovery_config();
        let secret_patterns = self.config.secret_patterns.clone();
        let chunking = self.config.chunking.clone();
        let ocr = self.ocr.clone();
        let transcriber = self.transcriber.clone();
        let ocr_cache_dir = self.config.ocr_cache_dir();
        let transcript_cache_dir = self.config.transcribe_cache_dir();
        let cache_policy = self.config.cache_policy();
        let cancel = CancellationToken::new();

        let result = tokio::task::spawn_blocking(move || {
            let handle = tokio::runtime::Handle::current();
            let ocr_cache = ContentCache::new(ocr_cache_dir, cache_policy.clone());
            let transcript_cache = ContentCache::new(transcript_cache_dir, cache_policy);
            let config = IngestConfig {
                discovery,
                secret_patterns,
                chunking,
                ocr: ocr.as_deref(),
                transcriber: transcriber.as_deref(),
                ocr_cache: Some(&ocr_cache),
                transcript_cache: Some(&transcript_cache),
            };
            handle.block_on(run_scan(&store, &state, &config, &cancel))
        })
        .await
        .map_err(|e| EngineError::ScanTask(e.to_string()))?;

        self.state.end_scan();
        Ok(result?)
    }

    pub fn retrieval(&self) -> RetrievalService<'_> {
        RetrievalService {
            store: &self.store,
            ann_text: &self.ann_text,
            ann_code: &self.ann_code,
            cache_text: &self.cache_text,
            cache_code: &self.cache_code,
            embedder: self.embedder.as_ref(),
            generator: self.generator.as_deref(),
            config: RetrieveConfig {
                k_default: self.config.rag.k_default,
                overfetch_multiplier: self.config.rag.overfetch_multiplier,
                max_context_chars: self.config.rag.max_context_chars,
                embed_text_model: self.config.embed_text_model.clone(),
                embed_code_model: self.config.embed_code_model.clone(),
            },
        }
    }

    pub fn state(&self) -> &IndexingState {
        &self.state
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// Cancels the embedding workers, saves both ANN indexes, and flushes
    /// the snapshot one final time.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        if let Some(tasks) = self.running.lock().unwrap().take() {
            tasks.cancel.cancel();
            let _ = tasks.worker_text.await;
            let _ = tasks.worker_code.await;
        }
        self.snapshot.stop().await;
        if let Err(e) = self.persistence.stop_and_save().await {
            warn!("persistence shutdown reported a partial save: {e}");
            return Err(EngineError::Persistence(e));
        }
        info!("corpus engine shut down cleanly");
        Ok(())
    }
}

/// Installs the process-wide `tracing` subscriber, honoring
/// `RUST_LOG`/`corpus_engine=info` conventions. Call once from the
/// top-level binary; a no-op error (already set) is swallowed since
/// tests may call this more than once across the process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}

/// Stub collaborator used only where a caller wants to run the engine
/// with embedding but without OCR/transcription/generation configured.
pub struct NoopGenerator;

#[async_trait::async_trait]
impl Generator for NoopGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, CollabError> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedding_provider::DeterministicEmbedder;
    use std::fs;

    fn write_file(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn open_creates_state_dir_layout() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        write_file(root.path(), "docs/a.md", "alpha");

        let config = CorpusConfig::new(root.path(), state_dir.path());
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let engine = CorpusEngine::open(config, embedder, None, None, None).unwrap();

        assert!(state_dir.path().join("cache/ocr").is_dir());
        assert!(state_dir.path().join("cache/transcribe").is_dir());
        assert!(!engine.state().is_running());
    }

    #[tokio::test]
    async fn run_scan_once_indexes_new_files_and_snapshot_reflects_it() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        write_file(root.path(), "docs/a.md", "alpha beta");

        let config = CorpusConfig::new(root.path(), state_dir.path());
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let engine = CorpusEngine::open(config, embedder, None, None, None).unwrap();

        let report = engine.run_scan_once(IndexingMode::Incremental).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.processed, 1);

        let snapshot = engine.retrieval().stats(engine.state()).unwrap();
        assert_eq!(snapshot.stats.documents_total, 1);
    }

    #[tokio::test]
    async fn start_then_shutdown_joins_workers_cleanly() {
        let root = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        write_file(root.path(), "docs/a.md", "alpha");

        let config = CorpusConfig::new(root.path(), state_dir.path());
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));
        let engine = CorpusEngine::open(config, embedder, None, None, None).unwrap();

        engine.run_scan_once(IndexingMode::Incremental).await.unwrap();
        engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.shutdown().await.unwrap();

        assert!(state_dir.path().join("vectors_text.hnsw").exists() || state_dir.path().join("vectors_code.hnsw").exists());
    }
}
