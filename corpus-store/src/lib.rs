//! Durable metadata store (C1), ANN index (C2) and persistence manager (C3).
//!
//! Grounded on the teacher's `chunking-store` crate: `sqlite_repo` (upgraded
//! from an in-memory stub to a real `rusqlite` backend), `hnsw_index`
//! (upgraded from a no-op stub into a working flat cosine index), and
//! `orchestrator` (ingest/delete transaction shape).

mod ann_index;
mod persistence;
mod schema;
mod sqlite_store;
mod stats;

pub use ann_index::AnnIndex;
pub use persistence::{IndexHandle, PersistenceError, PersistenceManager};
pub use corpus_model::{Chunk, ChunkWithSpans};
pub use sqlite_store::{ListFilesResult, Settings, SqliteStore, Tx};
pub use stats::CorpusStats;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("model error: {0}")]
    Model(#[from] corpus_model::ModelError),
}
