use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ann_index::AnnIndex;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to persist index `{name}`: {source}")]
    Save { name: String, source: crate::StoreError },
    #[error("{0} of {1} indexes failed to persist")]
    Partial(usize, usize),
}

/// One named ANN index plus the path it is persisted to.
#[derive(Clone)]
pub struct IndexHandle {
    pub name: String,
    pub path: PathBuf,
    pub index: Arc<AnnIndex>,
}

impl IndexHandle {
    pub fn new(name: impl Into<String>, path: PathBuf, index: Arc<AnnIndex>) -> Self {
        Self { name: name.into(), path, index }
    }
}

/// Periodic persistence for the text and code ANN indexes (C3).
///
/// Grounded on spec.md's own contract ("every N seconds... write each
/// dirty index to disk") applied to the teacher's `hnsw_index.rs`
/// placeholder, which never persisted anything. Uses a
/// `tokio_util::sync::CancellationToken` for cooperative shutdown since the
/// teacher pack has no equivalent ticker-with-cancellation primitive.
pub struct PersistenceManager {
    handles: Vec<IndexHandle>,
    interval: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    pub fn new(handles: Vec<IndexHandle>) -> Self {
        Self::with_interval(handles, DEFAULT_INTERVAL)
    }

    pub fn with_interval(handles: Vec<IndexHandle>, interval: Duration) -> Self {
        Self {
            handles,
            interval,
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Loads every index from disk sequentially, stopping early if
    /// cancellation is requested mid-load.
    pub fn load_all(&self) -> Result<(), PersistenceError> {
        for handle in &self.handles {
            if self.cancel.is_cancelled() {
                break;
            }
            handle.index.load(&handle.path).map_err(|source| PersistenceError::Save {
                name: handle.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Spawns the background ticker. Safe to call once; a second call
    /// replaces the previous worker handle without aborting it, so callers
    /// should only invoke this during startup.
    pub fn start(&self) {
        let handles = self.handles.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        save_all(&handles);
                    }
                }
            }
        });
        *self.worker.lock() = Some(join);
    }

    /// Cancels the ticker, joins the worker task, then performs one final
    /// save of every index, collecting per-index errors.
    pub async fn stop_and_save(&self) -> Result<(), PersistenceError> {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }

        let mut failures = Vec::new();
        for handle in &self.handles {
            if let Err(e) = handle.index.save(&handle.path) {
                tracing::error!(index = %handle.name, error = %e, "failed to persist ann index");
                failures.push(handle.name.clone());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PersistenceError::Partial(failures.len(), self.handles.len()))
        }
    }
}

fn save_all(handles: &[IndexHandle]) {
    for handle in handles {
        if let Err(e) = handle.index.save(&handle.path) {
            tracing::error!(index = %handle.name, error = %e, "failed to persist ann index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_all_is_noop_when_files_absent() {
        let idx = Arc::new(AnnIndex::new());
        let handles = vec![IndexHandle::new("text", PathBuf::from("/nonexistent/text.ann"), idx)];
        let mgr = PersistenceManager::new(handles);
        mgr.load_all().unwrap();
    }

    #[tokio::test]
    async fn stop_and_save_persists_every_index() {
        let dir = tempfile::tempdir().unwrap();
        let idx = Arc::new(AnnIndex::new());
        idx.add(1, &[1.0, 2.0]).unwrap();
        let path = dir.path().join("text.ann");
        let handles = vec![IndexHandle::new("text", path.clone(), idx)];
        let mgr = PersistenceManager::new(handles);

        mgr.stop_and_save().await.unwrap();
        assert!(path.exists());
    }
}
