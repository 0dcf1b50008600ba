use rusqlite::Connection;

use crate::StoreError;

/// Current on-disk schema version. Bumped whenever a migration is added to
/// `ensure_schema`; stored in the `settings` table under `schema_version`.
pub const SCHEMA_VERSION: &str = "1";

/// Creates every table/index this crate relies on if they are missing.
/// Safe to call on every open, mirroring the teacher's defensive
/// `maybe_rebuild_fts` pattern (`hybrid-service::open_repo`), generalized
/// from "rebuild one virtual table" to "ensure the whole schema".
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS documents (
            doc_id          INTEGER PRIMARY KEY AUTOINCREMENT,
            rel_path        TEXT NOT NULL UNIQUE,
            doc_type        TEXT NOT NULL,
            source_type     TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            mtime_unix      INTEGER NOT NULL,
            content_hash    TEXT NOT NULL,
            status          TEXT NOT NULL,
            deleted         INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_documents_rel_path_deleted ON documents(rel_path, deleted);

        CREATE TABLE IF NOT EXISTS representations (
            rep_id          INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id          INTEGER NOT NULL REFERENCES documents(doc_id),
            rep_type        TEXT NOT NULL,
            rep_hash        TEXT NOT NULL,
            created_unix    INTEGER NOT NULL,
            deleted         INTEGER NOT NULL DEFAULT 0,
            UNIQUE(doc_id, rep_type)
        );

        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id          INTEGER PRIMARY KEY AUTOINCREMENT,
            rep_id            INTEGER NOT NULL REFERENCES representations(rep_id),
            ordinal           INTEGER NOT NULL,
            text              TEXT NOT NULL,
            text_hash         TEXT NOT NULL,
            index_kind        TEXT NOT NULL,
            embedding_status  TEXT NOT NULL DEFAULT 'pending',
            embedding_error   TEXT,
            deleted           INTEGER NOT NULL DEFAULT 0,
            rel_path          TEXT NOT NULL,
            doc_type          TEXT NOT NULL,
            rep_type          TEXT NOT NULL,
            UNIQUE(rep_id, ordinal)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_embedding_status ON chunks(embedding_status);
        CREATE INDEX IF NOT EXISTS idx_chunks_index_kind ON chunks(index_kind);
        CREATE INDEX IF NOT EXISTS idx_chunks_rep_ordinal ON chunks(rep_id, ordinal);

        CREATE TABLE IF NOT EXISTS spans (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id   INTEGER NOT NULL REFERENCES chunks(chunk_id),
            seq        INTEGER NOT NULL,
            kind       TEXT NOT NULL,
            start      INTEGER NOT NULL,
            end        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_spans_chunk_seq ON spans(chunk_id, seq);

        CREATE TABLE IF NOT EXISTS settings (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO settings(key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
