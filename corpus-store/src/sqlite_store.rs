use std::collections::HashMap;
use std::path::Path;

use corpus_model::{
    Chunk, ChunkDraft, ChunkId, ChunkWithSpans, Document, DocId, DocStatus, DocType, EmbeddingStatus,
    IndexKind, RepId, RepType, Representation, SourceType, Span,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::schema::{ensure_schema, SCHEMA_VERSION};
use crate::stats::CorpusStats;
use crate::StoreError;

/// Durable metadata store (C1).
///
/// Grounded on the teacher's `chunking-store::sqlite_repo`, upgraded from an
/// in-memory `Vec<ChunkRecord>` stub to a real `rusqlite` backend, and on
/// `orchestrator::{ingest_chunks_orchestrated, delete_by_filter_orchestrated}`
/// for the representation+chunks+spans transaction shape.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Validation(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        ensure_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, used by tests and by short-lived tooling.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner();
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    // -- documents -----------------------------------------------------

    pub fn upsert_document(&self, doc: &Document) -> Result<DocId, StoreError> {
        let conn = self.conn.lock();
        upsert_document_impl(&conn, doc)
    }

    pub fn get_document_by_path(&self, rel_path: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock();
        get_document_by_path_impl(&conn, rel_path)
    }

    pub fn get_document(&self, doc_id: DocId) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT doc_id, rel_path, doc_type, source_type, size_bytes, mtime_unix, content_hash, status, deleted
             FROM documents WHERE doc_id = ?1",
            [doc_id.0],
            row_to_document,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Lists active (non-deleted) documents in `rel_path` order, with the
    /// two optional filters spec.md §4.1 names: `prefix` (a literal
    /// `rel_path` string prefix) and `glob` (a shell-glob, matched via
    /// SQLite's native `GLOB` operator). Supports paged scans.
    pub fn list_files(
        &self,
        prefix: Option<&str>,
        glob: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<ListFilesResult, StoreError> {
        let conn = self.conn.lock();

        let mut where_clauses = vec!["deleted = 0".to_string()];
        let mut filter_params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(p) = prefix {
            filter_params.push(rusqlite::types::Value::Text(p.to_string()));
            where_clauses.push(format!("substr(rel_path, 1, length(?{0})) = ?{0}", filter_params.len()));
        }
        if let Some(g) = glob {
            filter_params.push(rusqlite::types::Value::Text(g.to_string()));
            where_clauses.push(format!("rel_path GLOB ?{}", filter_params.len()));
        }
        let where_clause = where_clauses.join(" AND ");

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM documents WHERE {where_clause}"),
            rusqlite::params_from_iter(filter_params.iter()),
            |r| r.get(0),
        )?;

        let sql = format!(
            "SELECT doc_id, rel_path, doc_type, source_type, size_bytes, mtime_unix, content_hash, status, deleted
             FROM documents WHERE {where_clause}
             ORDER BY rel_path LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            limit_idx = filter_params.len() + 1,
            offset_idx = filter_params.len() + 2,
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut page_params = filter_params;
        page_params.push(rusqlite::types::Value::Integer(limit as i64));
        page_params.push(rusqlite::types::Value::Integer(offset as i64));
        let documents = stmt
            .query_map(rusqlite::params_from_iter(page_params.iter()), row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ListFilesResult { documents, total })
    }

    /// Soft-deletes a document and cascades the tombstone to its
    /// representations and chunks in one transaction, so a reader never
    /// observes a deleted document with live chunks.
    pub fn mark_document_deleted(&self, doc_id: DocId) -> Result<(), StoreError> {
        self.with_tx(|tx| {
            tx.tx.execute("UPDATE documents SET deleted = 1 WHERE doc_id = ?1", [doc_id.0])?;
            tx.tx.execute(
                "UPDATE representations SET deleted = 1 WHERE doc_id = ?1",
                [doc_id.0],
            )?;
            tx.tx.execute(
                "UPDATE chunks SET deleted = 1
                 WHERE rep_id IN (SELECT rep_id FROM representations WHERE doc_id = ?1)",
                [doc_id.0],
            )?;
            Ok(())
        })
    }

    // -- representations -------------------------------------------------

    pub fn upsert_representation(&self, rep: &Representation) -> Result<RepId, StoreError> {
        let conn = self.conn.lock();
        upsert_representation_impl(&conn, rep)
    }

    // -- chunks ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn insert_chunk_with_spans(
        &self,
        rep_id: RepId,
        draft: &ChunkDraft,
        index_kind: IndexKind,
        rel_path: &str,
        doc_type: DocType,
        rep_type: RepType,
    ) -> Result<ChunkId, StoreError> {
        let conn = self.conn.lock();
        insert_chunk_with_spans_impl(&conn, rep_id, draft, index_kind, rel_path, doc_type, rep_type)
    }

    pub fn soft_delete_chunks_from_ordinal(&self, rep_id: RepId, from_ordinal: u32) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        soft_delete_chunks_from_ordinal_impl(&conn, rep_id, from_ordinal)
    }

    /// Pulls up to `limit` chunks of `index_kind` awaiting embedding,
    /// ordered by `chunk_id` ascending, joined with their spans (spec.md
    /// §4.1: "`next_pending(limit, index_kind)`"). Concurrency correctness
    /// relies on the caller partitioning workers by `index_kind`
    /// (spec.md §9): the store itself is stateless with respect to claims.
    pub fn next_pending(&self, limit: u32, index_kind: IndexKind) -> Result<Vec<ChunkWithSpans>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, rep_id, ordinal, text, text_hash, index_kind, embedding_status,
                    embedding_error, deleted, rel_path, doc_type, rep_type
             FROM chunks
             WHERE embedding_status = 'pending' AND deleted = 0 AND index_kind = ?1
             ORDER BY chunk_id
             LIMIT ?2",
        )?;
        let chunks = stmt
            .query_map(params![index_kind.as_str(), limit], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let spans = load_spans(&conn, chunk.chunk_id)?;
            out.push(ChunkWithSpans { chunk, spans });
        }
        Ok(out)
    }

    /// Pages chunks already embedded for `index_kind`, used to hydrate the
    /// retrieval label→metadata cache on startup (spec.md §4.1).
    pub fn list_embedded_chunk_metadata(
        &self,
        index_kind: IndexKind,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Chunk>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, rep_id, ordinal, text, text_hash, index_kind, embedding_status,
                    embedding_error, deleted, rel_path, doc_type, rep_type
             FROM chunks
             WHERE embedding_status = 'ok' AND index_kind = ?1 AND deleted = 0
             ORDER BY chunk_id
             LIMIT ?2 OFFSET ?3",
        )?;
        let chunks = stmt
            .query_map(params![index_kind.as_str(), limit, offset], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// Batch-transitions `labels` to `embedding_status=ok` in one
    /// transaction (spec.md §4.1: "run as a single transaction").
    pub fn mark_embedded(&self, labels: &[ChunkId]) -> Result<(), StoreError> {
        if labels.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for label in labels {
            tx.execute(
                "UPDATE chunks SET embedding_status = 'ok', embedding_error = NULL WHERE chunk_id = ?1",
                [label.0 as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Batch-transitions `labels` to `embedding_status=error` with a
    /// shared `reason`, in one transaction.
    pub fn mark_failed(&self, labels: &[ChunkId], reason: &str) -> Result<(), StoreError> {
        if labels.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for label in labels {
            tx.execute(
                "UPDATE chunks SET embedding_status = 'error', embedding_error = ?2 WHERE chunk_id = ?1",
                params![label.0 as i64, reason],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT chunk_id, rep_id, ordinal, text, text_hash, index_kind, embedding_status,
                    embedding_error, deleted, rel_path, doc_type, rep_type
             FROM chunks WHERE chunk_id IN ({placeholders}) AND deleted = 0"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<i64> = ids.iter().map(|id| id.0 as i64).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_id: HashMap<u64, Chunk> = rows.into_iter().map(|c| (c.chunk_id.0, c)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(&id.0)).collect())
    }

    // -- transactional view ----------------------------------------------

    /// Runs `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back (via drop) on `Err`. Used by the ingest service to
    /// upsert a representation plus all of its chunks and spans as one
    /// atomic unit (spec.md's "representation + chunks + spans" contract).
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Tx) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let wrapper = Tx { tx };
        let result = f(&wrapper)?;
        wrapper.tx.commit()?;
        Ok(result)
    }

    // -- settings ----------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn settings(&self) -> Result<Settings, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let mut extra = HashMap::new();
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, value) = row?;
            extra.insert(key, value);
        }
        let schema_version = extra
            .remove("schema_version")
            .unwrap_or_else(|| SCHEMA_VERSION.to_string());
        Ok(Settings { schema_version, extra })
    }

    // -- stats ----------------------------------------------------------

    pub fn corpus_stats(&self) -> Result<CorpusStats, StoreError> {
        let conn = self.conn.lock();
        let documents_total = count(&conn, "SELECT COUNT(*) FROM documents WHERE deleted = 0")?;
        let documents_deleted = count(&conn, "SELECT COUNT(*) FROM documents WHERE deleted = 1")?;
        let representations_total = count(&conn, "SELECT COUNT(*) FROM representations WHERE deleted = 0")?;
        let chunks_total = count(&conn, "SELECT COUNT(*) FROM chunks WHERE deleted = 0")?;
        let chunks_pending = count(
            &conn,
            "SELECT COUNT(*) FROM chunks WHERE deleted = 0 AND embedding_status = 'pending'",
        )?;
        let chunks_embedded = count(
            &conn,
            "SELECT COUNT(*) FROM chunks WHERE deleted = 0 AND embedding_status = 'ok'",
        )?;
        let chunks_failed = count(
            &conn,
            "SELECT COUNT(*) FROM chunks WHERE deleted = 0 AND embedding_status = 'error'",
        )?;
        Ok(CorpusStats {
            documents_total,
            documents_deleted,
            representations_total,
            chunks_total,
            chunks_pending,
            chunks_embedded,
            chunks_failed,
        })
    }
}

fn count(conn: &Connection, sql: &str) -> Result<u64, StoreError> {
    let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
    Ok(n as u64)
}

/// Transactional handle exposing the same representation/chunk/span
/// operations as `SqliteStore`, scoped to a single commit-or-rollback unit.
pub struct Tx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl Tx<'_> {
    pub fn upsert_representation(&self, rep: &Representation) -> Result<RepId, StoreError> {
        upsert_representation_impl(&self.tx, rep)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_chunk_with_spans(
        &self,
        rep_id: RepId,
        draft: &ChunkDraft,
        index_kind: IndexKind,
        rel_path: &str,
        doc_type: DocType,
        rep_type: RepType,
    ) -> Result<ChunkId, StoreError> {
        insert_chunk_with_spans_impl(&self.tx, rep_id, draft, index_kind, rel_path, doc_type, rep_type)
    }

    pub fn soft_delete_chunks_from_ordinal(&self, rep_id: RepId, from_ordinal: u32) -> Result<u64, StoreError> {
        soft_delete_chunks_from_ordinal_impl(&self.tx, rep_id, from_ordinal)
    }

    pub fn upsert_document(&self, doc: &Document) -> Result<DocId, StoreError> {
        upsert_document_impl(&self.tx, doc)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub schema_version: String,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ListFilesResult {
    pub documents: Vec<Document>,
    pub total: u64,
}

// -- shared impls, callable against either a Connection or a Transaction --
// (`rusqlite::Transaction` derefs to `Connection`.)

fn upsert_document_impl(conn: &Connection, doc: &Document) -> Result<DocId, StoreError> {
    let id: i64 = conn.query_row(
        "INSERT INTO documents(rel_path, doc_type, source_type, size_bytes, mtime_unix, content_hash, status, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(rel_path) DO UPDATE SET
             doc_type = excluded.doc_type,
             source_type = excluded.source_type,
             size_bytes = excluded.size_bytes,
             mtime_unix = excluded.mtime_unix,
             content_hash = excluded.content_hash,
             status = excluded.status,
             deleted = 0
         RETURNING doc_id",
        params![
            doc.rel_path,
            doc.doc_type.as_str(),
            doc.source_type.as_str(),
            doc.size_bytes as i64,
            doc.mtime_unix,
            doc.content_hash,
            doc.status.as_str(),
        ],
        |r| r.get(0),
    )?;
    Ok(DocId(id))
}

fn get_document_by_path_impl(conn: &Connection, rel_path: &str) -> Result<Option<Document>, StoreError> {
    conn.query_row(
        "SELECT doc_id, rel_path, doc_type, source_type, size_bytes, mtime_unix, content_hash, status, deleted
         FROM documents WHERE rel_path = ?1",
        [rel_path],
        row_to_document,
    )
    .optional()
    .map_err(StoreError::from)
}

fn upsert_representation_impl(conn: &Connection, rep: &Representation) -> Result<RepId, StoreError> {
    let id: i64 = conn.query_row(
        "INSERT INTO representations(doc_id, rep_type, rep_hash, created_unix, deleted)
         VALUES (?1, ?2, ?3, ?4, 0)
         ON CONFLICT(doc_id, rep_type) DO UPDATE SET
             rep_hash = excluded.rep_hash,
             created_unix = excluded.created_unix,
             deleted = 0
         RETURNING rep_id",
        params![rep.doc_id.0, rep.rep_type.as_str(), rep.rep_hash, rep.created_unix],
        |r| r.get(0),
    )?;
    Ok(RepId(id))
}

fn insert_chunk_with_spans_impl(
    conn: &Connection,
    rep_id: RepId,
    draft: &ChunkDraft,
    index_kind: IndexKind,
    rel_path: &str,
    doc_type: DocType,
    rep_type: RepType,
) -> Result<ChunkId, StoreError> {
    let text_hash = corpus_model::text_sha256_hex(&draft.text);
    let chunk_id: i64 = conn.query_row(
        "INSERT INTO chunks(rep_id, ordinal, text, text_hash, index_kind, embedding_status,
                             embedding_error, deleted, rel_path, doc_type, rep_type)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', NULL, 0, ?6, ?7, ?8)
         ON CONFLICT(rep_id, ordinal) DO UPDATE SET
             text = excluded.text,
             text_hash = excluded.text_hash,
             index_kind = excluded.index_kind,
             embedding_status = 'pending',
             embedding_error = NULL,
             deleted = 0,
             rel_path = excluded.rel_path,
             doc_type = excluded.doc_type,
             rep_type = excluded.rep_type
         RETURNING chunk_id",
        params![
            rep_id.0,
            draft.ordinal,
            draft.text,
            text_hash,
            index_kind.as_str(),
            rel_path,
            doc_type.as_str(),
            rep_type.as_str(),
        ],
        |r| r.get(0),
    )?;

    conn.execute("DELETE FROM spans WHERE chunk_id = ?1", [chunk_id])?;
    for (seq, span) in draft.spans.iter().enumerate() {
        let (kind, start, end) = span.flatten();
        conn.execute(
            "INSERT INTO spans(chunk_id, seq, kind, start, end) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chunk_id, seq as i64, kind, start, end],
        )?;
    }

    Ok(ChunkId(chunk_id as u64))
}

fn soft_delete_chunks_from_ordinal_impl(
    conn: &Connection,
    rep_id: RepId,
    from_ordinal: u32,
) -> Result<u64, StoreError> {
    let affected = conn.execute(
        "UPDATE chunks SET deleted = 1 WHERE rep_id = ?1 AND ordinal >= ?2 AND deleted = 0",
        params![rep_id.0, from_ordinal],
    )?;
    Ok(affected as u64)
}

fn load_spans(conn: &Connection, chunk_id: ChunkId) -> Result<Vec<Span>, StoreError> {
    let mut stmt = conn.prepare("SELECT kind, start, end FROM spans WHERE chunk_id = ?1 ORDER BY seq")?;
    let rows = stmt.query_map([chunk_id.0 as i64], |row| {
        let kind: String = row.get(0)?;
        let start: i64 = row.get(1)?;
        let end: i64 = row.get(2)?;
        Ok((kind, start, end))
    })?;
    let mut spans = Vec::new();
    for row in rows {
        let (kind, start, end) = row?;
        spans.push(Span::from_flat(&kind, start, end)?);
    }
    Ok(spans)
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let doc_type_s: String = row.get(2)?;
    let source_type_s: String = row.get(3)?;
    let status_s: String = row.get(7)?;
    Ok(Document {
        doc_id: DocId(row.get(0)?),
        rel_path: row.get(1)?,
        doc_type: DocType::parse(&doc_type_s).unwrap_or(DocType::Ignore),
        source_type: SourceType::parse(&source_type_s).unwrap_or(SourceType::Filesystem),
        size_bytes: row.get::<_, i64>(4)? as u64,
        mtime_unix: row.get(5)?,
        content_hash: row.get(6)?,
        status: DocStatus::parse(&status_s).unwrap_or(DocStatus::Error),
        deleted: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    let index_kind_s: String = row.get(5)?;
    let embedding_status_s: String = row.get(6)?;
    let doc_type_s: String = row.get(10)?;
    let rep_type_s: String = row.get(11)?;
    Ok(Chunk {
        chunk_id: ChunkId(row.get::<_, i64>(0)? as u64),
        rep_id: RepId(row.get(1)?),
        ordinal: row.get::<_, i64>(2)? as u32,
        text: row.get(3)?,
        text_hash: row.get(4)?,
        index_kind: IndexKind::parse(&index_kind_s).unwrap_or(IndexKind::Text),
        embedding_status: EmbeddingStatus::parse(&embedding_status_s).unwrap_or(EmbeddingStatus::Pending),
        embedding_error: row.get(7)?,
        deleted: row.get::<_, i64>(8)? != 0,
        rel_path: row.get(9)?,
        doc_type: DocType::parse(&doc_type_s).unwrap_or(DocType::Ignore),
        rep_type: RepType::parse(&rep_type_s).unwrap_or(RepType::RawText),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc(path: &str) -> Document {
        Document::new(path, DocType::Text, SourceType::Filesystem, 10, 1_700_000_000, "hash-a", DocStatus::Ok)
            .unwrap()
    }

    #[test]
    fn upsert_document_is_idempotent_by_path() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id1 = store.upsert_document(&sample_doc("a/b.txt")).unwrap();
        let id2 = store.upsert_document(&sample_doc("a/b.txt")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.corpus_stats().unwrap().documents_total, 1);
    }

    #[test]
    fn list_files_orders_by_rel_path_and_applies_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_document(&sample_doc("src/b.rs")).unwrap();
        store.upsert_document(&sample_doc("src/a.rs")).unwrap();
        store.upsert_document(&sample_doc("docs/readme.md")).unwrap();
        let deleted_id = store.upsert_document(&sample_doc("src/gone.rs")).unwrap();
        store.mark_document_deleted(deleted_id).unwrap();

        let all = store.list_files(None, None, 10, 0).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(
            all.documents.iter().map(|d| d.rel_path.as_str()).collect::<Vec<_>>(),
            vec!["docs/readme.md", "src/a.rs", "src/b.rs"]
        );

        let prefixed = store.list_files(Some("src/"), None, 10, 0).unwrap();
        assert_eq!(prefixed.total, 2);
        assert_eq!(prefixed.documents[0].rel_path, "src/a.rs");
        assert_eq!(prefixed.documents[1].rel_path, "src/b.rs");

        let globbed = store.list_files(None, Some("*.md"), 10, 0).unwrap();
        assert_eq!(globbed.total, 1);
        assert_eq!(globbed.documents[0].rel_path, "docs/readme.md");

        let paged = store.list_files(None, None, 1, 1).unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.documents.len(), 1);
        assert_eq!(paged.documents[0].rel_path, "src/a.rs");
    }

    #[test]
    fn mark_document_deleted_cascades() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc_id = store.upsert_document(&sample_doc("a.txt")).unwrap();
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
        store
            .insert_chunk_with_spans(rep_id, &draft, IndexKind::Text, "a.txt", DocType::Text, RepType::RawText)
            .unwrap();

        store.mark_document_deleted(doc_id).unwrap();

        let stats = store.corpus_stats().unwrap();
        assert_eq!(stats.documents_total, 0);
        assert_eq!(stats.chunks_total, 0);
    }

    #[test]
    fn next_pending_and_mark_embedded_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc_id = store.upsert_document(&sample_doc("a.txt")).unwrap();
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
        let chunk_id = store
            .insert_chunk_with_spans(rep_id, &draft, IndexKind::Text, "a.txt", DocType::Text, RepType::RawText)
            .unwrap();

        let pending = store.next_pending(10, IndexKind::Text).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].chunk.chunk_id, chunk_id);
        assert_eq!(pending[0].spans.len(), 1);
        assert!(store.next_pending(10, IndexKind::Code).unwrap().is_empty());

        store.mark_embedded(&[chunk_id]).unwrap();
        assert!(store.next_pending(10, IndexKind::Text).unwrap().is_empty());
        assert_eq!(store.corpus_stats().unwrap().chunks_embedded, 1);

        let embedded = store.list_embedded_chunk_metadata(IndexKind::Text, 10, 0).unwrap();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].chunk_id, chunk_id);
    }

    #[test]
    fn soft_delete_from_ordinal_trims_stale_tail() {
        let store = SqliteStore::open_in_memory().unwrap();
        let doc_id = store.upsert_document(&sample_doc("a.txt")).unwrap();
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
        for ordinal in 0..3u32 {
            let draft = ChunkDraft::new(
                ordinal,
                format!("chunk {ordinal}"),
                vec![Span::Lines { start_line: 1, end_line: 1 }],
            )
            .unwrap();
            store
                .insert_chunk_with_spans(rep_id, &draft, IndexKind::Text, "a.txt", DocType::Text, RepType::RawText)
                .unwrap();
        }
        assert_eq!(store.corpus_stats().unwrap().chunks_total, 3);

        let affected = store.soft_delete_chunks_from_ordinal(rep_id, 1).unwrap();
        assert_eq!(affected, 2);
        assert_eq!(store.corpus_stats().unwrap().chunks_total, 1);
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_tx(|tx| {
            tx.upsert_document(&sample_doc("rollback.txt"))?;
            Err(StoreError::Validation("forced".into()))
        });
        assert!(result.is_err());
        assert!(store.get_document_by_path("rollback.txt").unwrap().is_none());
    }
}
