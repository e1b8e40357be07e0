//! SQLite backend with vector similarity via the `sqlite-vec` extension.
//!
//! One [`SqliteStore`] implements all three persistence seams
//! ([`ChunkStore`], [`AssessmentStore`],
//! [`crate::conversation::ConversationStore`]) over a single
//! `tokio_rusqlite::Connection`. All statements run on the connection's
//! worker thread, which also serializes concurrent re-ingestion of the same
//! document id: the transactional delete-then-insert is last-writer-wins,
//! never interleaved.
//!
//! Embeddings are stored as float32 blobs produced by `vec_f32()` and
//! compared with `vec_distance_cosine()`.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, ffi};

use crate::conversation::ConversationStore;
use crate::message::ConversationTurn;
use crate::types::{
    AssessmentRecord, DocumentCategory, GroundwaterStatus, LocationLevel, LocationPath, StoreError,
};

use super::{
    AssessmentStore, ChunkRecord, ChunkStore, DocumentRecord, LocationEntry, MatchMode,
    SearchFilters, SearchHit,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    content TEXT,
    uploaded_at TEXT NOT NULL,
    local_only INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB,
    needs_reindex INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    level TEXT NOT NULL,
    parent_id INTEGER REFERENCES locations(id),
    UNIQUE(name, level, parent_id)
);
CREATE TABLE IF NOT EXISTS assessments (
    location_id INTEGER NOT NULL REFERENCES locations(id),
    metric TEXT NOT NULL,
    year INTEGER NOT NULL,
    value REAL NOT NULL,
    unit TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (location_id, metric, year)
);
CREATE TABLE IF NOT EXISTS conversation_turns (
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    at TEXT NOT NULL,
    provenance TEXT,
    PRIMARY KEY (session_id, seq)
);
";

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.ordinal, c.content, c.embedding, \
     c.needs_reindex, d.title, d.category, d.tags, d.local_only, d.uploaded_at";

/// SQLite-backed store for documents, chunks, assessments, and conversations.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))?;
        Self::initialize(conn).await
    }

    /// Open an in-memory database, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| -> tokio_rusqlite::Result<_> {
            // Fail fast if the extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Error)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Error)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Sqlite(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Underlying connection, for operations the traits do not cover.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn register_sqlite_vec() -> Result<(), StoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Sqlite)
    }
}

// ============================================================================
// Row mapping helpers
// ============================================================================

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Bind-ready date-range bounds; `None` binds as SQL NULL and disables the
/// clause via the `(?N IS NULL OR ...)` guards in each query.
fn filter_params(filters: &SearchFilters) -> (Option<String>, Option<String>, Option<String>) {
    (
        filters.category.map(|c| c.as_str().to_string()),
        filters.uploaded_after.map(|at| at.to_rfc3339()),
        filters.uploaded_before.map(|at| at.to_rfc3339()),
    )
}

// ============================================================================
// ChunkStore
// ============================================================================

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn upsert_document(
        &self,
        document: &DocumentRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError> {
        let document = document.clone();
        let tags_json = serde_json::to_string(&document.tags)?;
        let mut chunk_rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding_json = match &chunk.embedding {
                Some(embedding) => Some(serde_json::to_string(embedding)?),
                None => None,
            };
            chunk_rows.push((chunk, embedding_json));
        }

        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;

                tx.execute("DELETE FROM chunks WHERE document_id = ?1", (&document.id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute(
                    "INSERT OR REPLACE INTO documents \
                     (id, owner, title, category, tags, content, uploaded_at, local_only) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    (
                        &document.id,
                        &document.owner,
                        &document.title,
                        document.category.as_str(),
                        &tags_json,
                        &document.text,
                        document.uploaded_at.to_rfc3339(),
                        document.local_only as i64,
                    ),
                )
                .map_err(tokio_rusqlite::Error::Error)?;

                for (chunk, embedding_json) in &chunk_rows {
                    match embedding_json {
                        Some(json) => tx
                            .execute(
                                "INSERT INTO chunks \
                                 (id, document_id, ordinal, content, embedding, needs_reindex) \
                                 VALUES (?1, ?2, ?3, ?4, vec_f32(?5), ?6)",
                                (
                                    &chunk.id,
                                    &chunk.document_id,
                                    chunk.ordinal as i64,
                                    &chunk.content,
                                    json,
                                    chunk.needs_reindex as i64,
                                ),
                            )
                            .map_err(tokio_rusqlite::Error::Error)?,
                        None => tx
                            .execute(
                                "INSERT INTO chunks \
                                 (id, document_id, ordinal, content, embedding, needs_reindex) \
                                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                                (
                                    &chunk.id,
                                    &chunk.document_id,
                                    chunk.ordinal as i64,
                                    &chunk.content,
                                    chunk.needs_reindex as i64,
                                ),
                            )
                            .map_err(tokio_rusqlite::Error::Error)?,
                    };
                }

                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, StoreError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;
                let removed = tx
                    .execute("DELETE FROM chunks WHERE document_id = ?1", (&document_id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute("DELETE FROM documents WHERE id = ?1", (&document_id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(removed)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                conn.query_row(
                    "SELECT id, owner, title, category, tags, content, uploaded_at, local_only \
                     FROM documents WHERE id = ?1",
                    (&document_id,),
                    |row| {
                        Ok(DocumentRecord {
                            id: row.get(0)?,
                            owner: row.get(1)?,
                            title: row.get(2)?,
                            category: DocumentCategory::parse(&row.get::<_, String>(3)?),
                            tags: parse_tags(&row.get::<_, String>(4)?),
                            text: row.get(5)?,
                            uploaded_at: parse_timestamp(&row.get::<_, String>(6)?),
                            local_only: row.get::<_, i64>(7)? != 0,
                        })
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn chunks_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks c \
                     JOIN documents d ON d.id = c.document_id \
                     WHERE c.document_id = ?1 ORDER BY c.ordinal ASC"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map((&document_id,), |row| {
                        let embedding: Option<Vec<u8>> = row.get(4)?;
                        Ok(ChunkRecord {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            ordinal: row.get::<_, i64>(2)? as usize,
                            content: row.get(3)?,
                            embedding: embedding.as_deref().map(blob_to_embedding),
                            needs_reindex: row.get::<_, i64>(5)? != 0,
                            title: row.get(6)?,
                            category: DocumentCategory::parse(&row.get::<_, String>(7)?),
                            tags: parse_tags(&row.get::<_, String>(8)?),
                            local_only: row.get::<_, i64>(9)? != 0,
                            uploaded_at: parse_timestamp(&row.get::<_, String>(10)?),
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn chunks_needing_reindex(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks c \
                     JOIN documents d ON d.id = c.document_id \
                     WHERE c.needs_reindex = 1 ORDER BY c.document_id, c.ordinal ASC"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([], |row| {
                        let embedding: Option<Vec<u8>> = row.get(4)?;
                        Ok(ChunkRecord {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            ordinal: row.get::<_, i64>(2)? as usize,
                            content: row.get(3)?,
                            embedding: embedding.as_deref().map(blob_to_embedding),
                            needs_reindex: row.get::<_, i64>(5)? != 0,
                            title: row.get(6)?,
                            category: DocumentCategory::parse(&row.get::<_, String>(7)?),
                            tags: parse_tags(&row.get::<_, String>(8)?),
                            local_only: row.get::<_, i64>(9)? != 0,
                            uploaded_at: parse_timestamp(&row.get::<_, String>(10)?),
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn set_embeddings(&self, updates: Vec<(String, Vec<f32>)>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(updates.len());
        for (chunk_id, embedding) in updates {
            rows.push((chunk_id, serde_json::to_string(&embedding)?));
        }
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;
                for (chunk_id, embedding_json) in &rows {
                    tx.execute(
                        "UPDATE chunks SET embedding = vec_f32(?1), needs_reindex = 0 \
                         WHERE id = ?2",
                        (embedding_json, chunk_id),
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                }
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn search_semantic(
        &self,
        query_embedding: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding_json = serde_json::to_string(query_embedding)?;
        let (category, after, before) = filter_params(filters);
        let required_tags = filters.tags.clone();
        // Tag intersection happens after the fetch; over-fetch so a narrow
        // tag filter still fills top_k.
        let fetch = if required_tags.is_empty() {
            top_k
        } else {
            (top_k * 8).max(64)
        };

        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS}, \
                     vec_distance_cosine(c.embedding, vec_f32(?1)) AS distance \
                     FROM chunks c JOIN documents d ON d.id = c.document_id \
                     WHERE c.embedding IS NOT NULL AND d.local_only = 0 \
                     AND (?2 IS NULL OR d.category = ?2) \
                     AND (?3 IS NULL OR d.uploaded_at >= ?3) \
                     AND (?4 IS NULL OR d.uploaded_at <= ?4) \
                     ORDER BY distance ASC, d.uploaded_at DESC \
                     LIMIT {fetch}"
                );

                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map((&embedding_json, &category, &after, &before), |row| {
                        let embedding: Option<Vec<u8>> = row.get(4)?;
                        let chunk = ChunkRecord {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            ordinal: row.get::<_, i64>(2)? as usize,
                            content: row.get(3)?,
                            embedding: embedding.as_deref().map(blob_to_embedding),
                            needs_reindex: row.get::<_, i64>(5)? != 0,
                            title: row.get(6)?,
                            category: DocumentCategory::parse(&row.get::<_, String>(7)?),
                            tags: parse_tags(&row.get::<_, String>(8)?),
                            local_only: row.get::<_, i64>(9)? != 0,
                            uploaded_at: parse_timestamp(&row.get::<_, String>(10)?),
                        };
                        let distance: f32 = row.get(11)?;
                        Ok(SearchHit {
                            chunk,
                            score: 1.0 - distance,
                            mode: MatchMode::Semantic,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;

                let mut hits: Vec<SearchHit> = Vec::new();
                for row in rows {
                    let hit = row.map_err(tokio_rusqlite::Error::Error)?;
                    if required_tags.iter().all(|tag| hit.chunk.tags.contains(tag)) {
                        hits.push(hit);
                    }
                    if hits.len() == top_k {
                        break;
                    }
                }
                Ok(hits)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn search_lexical(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        top_k: usize,
        unembedded_only: bool,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let (category, after, before) = filter_params(filters);
        let required_tags = filters.tags.clone();

        // Scoring happens in Rust; the fetch is bounded and newest-first so
        // truncation favors recent documents.
        let chunks = self
            .conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let sql = format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks c \
                     JOIN documents d ON d.id = c.document_id \
                     WHERE d.local_only = 0 \
                     AND (?1 = 0 OR c.embedding IS NULL) \
                     AND (?2 IS NULL OR d.category = ?2) \
                     AND (?3 IS NULL OR d.uploaded_at >= ?3) \
                     AND (?4 IS NULL OR d.uploaded_at <= ?4) \
                     ORDER BY d.uploaded_at DESC \
                     LIMIT 1024"
                );
                let mut stmt = conn.prepare(&sql).map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map(
                        (unembedded_only as i64, &category, &after, &before),
                        |row| {
                            let embedding: Option<Vec<u8>> = row.get(4)?;
                            Ok(ChunkRecord {
                                id: row.get(0)?,
                                document_id: row.get(1)?,
                                ordinal: row.get::<_, i64>(2)? as usize,
                                content: row.get(3)?,
                                embedding: embedding.as_deref().map(blob_to_embedding),
                                needs_reindex: row.get::<_, i64>(5)? != 0,
                                title: row.get(6)?,
                                category: DocumentCategory::parse(&row.get::<_, String>(7)?),
                                tags: parse_tags(&row.get::<_, String>(8)?),
                                local_only: row.get::<_, i64>(9)? != 0,
                                uploaded_at: parse_timestamp(&row.get::<_, String>(10)?),
                            })
                        },
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;

                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))?;

        let mut hits: Vec<SearchHit> = chunks
            .into_iter()
            .filter(|chunk| required_tags.iter().all(|tag| chunk.tags.contains(tag)))
            .map(|chunk| {
                let haystack = chunk.content.to_lowercase();
                let matched = terms
                    .iter()
                    .filter(|term| haystack.contains(term.as_str()))
                    .count();
                SearchHit {
                    score: matched as f32 / terms.len() as f32,
                    chunk,
                    mode: MatchMode::Lexical,
                }
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.chunk.uploaded_at.cmp(&a.chunk.uploaded_at))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count_chunks(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| -> tokio_rusqlite::Result<_> {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }
}

// ============================================================================
// AssessmentStore
// ============================================================================

#[async_trait]
impl AssessmentStore for SqliteStore {
    async fn put_record(&self, record: &AssessmentRecord) -> Result<(), StoreError> {
        if record.location.unit.is_some() && record.location.district.is_none() {
            return Err(StoreError::Constraint(format!(
                "assessment unit '{}' has no district",
                record.location.leaf_name()
            )));
        }
        let record = record.clone();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;

                // Resolve or create each level of the record's own path.
                let mut location_id: Option<i64> = None;
                let components = [
                    Some((record.location.state.as_str(), LocationLevel::State)),
                    record
                        .location
                        .district
                        .as_deref()
                        .map(|name| (name, LocationLevel::District)),
                    record
                        .location
                        .unit
                        .as_deref()
                        .map(|name| (name, LocationLevel::Unit)),
                ];
                for (name, level) in components.into_iter().flatten() {
                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM locations \
                             WHERE name = ?1 AND level = ?2 AND parent_id IS ?3",
                            (name, level.as_str(), location_id),
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(tokio_rusqlite::Error::Error)?;
                    location_id = Some(match existing {
                        Some(id) => id,
                        None => {
                            tx.execute(
                                "INSERT INTO locations (name, level, parent_id) \
                                 VALUES (?1, ?2, ?3)",
                                (name, level.as_str(), location_id),
                            )
                            .map_err(tokio_rusqlite::Error::Error)?;
                            tx.last_insert_rowid()
                        }
                    });
                }
                let location_id = location_id.expect("state component always present");

                tx.execute(
                    "INSERT OR REPLACE INTO assessments \
                     (location_id, metric, year, value, unit, recorded_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    (
                        location_id,
                        &record.metric,
                        record.year,
                        record.value,
                        &record.unit,
                        record.recorded_at.to_rfc3339(),
                    ),
                )
                .map_err(tokio_rusqlite::Error::Error)?;

                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn find(
        &self,
        location: &LocationPath,
        metric: &str,
        year: Option<i32>,
    ) -> Result<Option<AssessmentRecord>, StoreError> {
        let location = location.clone();
        let metric = metric.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                // Walk the path down the hierarchy; a missing component means
                // no record can exist at this path.
                let mut location_id: Option<i64> = None;
                let components = [
                    Some((location.state.as_str(), LocationLevel::State)),
                    location
                        .district
                        .as_deref()
                        .map(|name| (name, LocationLevel::District)),
                    location
                        .unit
                        .as_deref()
                        .map(|name| (name, LocationLevel::Unit)),
                ];
                for (name, level) in components.into_iter().flatten() {
                    let found: Option<i64> = conn
                        .query_row(
                            "SELECT id FROM locations \
                             WHERE name = ?1 AND level = ?2 AND parent_id IS ?3",
                            (name, level.as_str(), location_id),
                            |row| row.get(0),
                        )
                        .optional()
                        .map_err(tokio_rusqlite::Error::Error)?;
                    match found {
                        Some(id) => location_id = Some(id),
                        None => return Ok(None),
                    }
                }
                let location_id = location_id.expect("state component always present");

                let row = match year {
                    Some(year) => conn
                        .query_row(
                            "SELECT value, unit, year, recorded_at FROM assessments \
                             WHERE location_id = ?1 AND metric = ?2 AND year = ?3",
                            (location_id, &metric, year),
                            |row| {
                                Ok((
                                    row.get::<_, f64>(0)?,
                                    row.get::<_, String>(1)?,
                                    row.get::<_, i32>(2)?,
                                    row.get::<_, String>(3)?,
                                ))
                            },
                        )
                        .optional(),
                    None => conn
                        .query_row(
                            "SELECT value, unit, year, recorded_at FROM assessments \
                             WHERE location_id = ?1 AND metric = ?2 \
                             ORDER BY year DESC LIMIT 1",
                            (location_id, &metric),
                            |row| {
                                Ok((
                                    row.get::<_, f64>(0)?,
                                    row.get::<_, String>(1)?,
                                    row.get::<_, i32>(2)?,
                                    row.get::<_, String>(3)?,
                                ))
                            },
                        )
                        .optional(),
                }
                .map_err(tokio_rusqlite::Error::Error)?;

                Ok(row.map(|(value, unit, year, recorded_at)| AssessmentRecord {
                    location: location.clone(),
                    metric: metric.clone(),
                    value,
                    unit,
                    year,
                    status: GroundwaterStatus::classify(value),
                    recorded_at: parse_timestamp(&recorded_at),
                }))
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn location_entries(&self) -> Result<Vec<LocationEntry>, StoreError> {
        self.conn
            .call(|conn| -> tokio_rusqlite::Result<_> {
                let mut entries = Vec::new();

                let mut stmt = conn
                    .prepare("SELECT name FROM locations WHERE level = 'state'")
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Error)?;
                for row in rows {
                    let state = row.map_err(tokio_rusqlite::Error::Error)?;
                    entries.push(LocationEntry {
                        path: LocationPath::state(state),
                        level: LocationLevel::State,
                    });
                }

                let mut stmt = conn
                    .prepare(
                        "SELECT d.name, s.name FROM locations d \
                         JOIN locations s ON s.id = d.parent_id \
                         WHERE d.level = 'district'",
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                for row in rows {
                    let (district, state) = row.map_err(tokio_rusqlite::Error::Error)?;
                    entries.push(LocationEntry {
                        path: LocationPath::district(state, district),
                        level: LocationLevel::District,
                    });
                }

                let mut stmt = conn
                    .prepare(
                        "SELECT u.name, d.name, s.name FROM locations u \
                         JOIN locations d ON d.id = u.parent_id \
                         JOIN locations s ON s.id = d.parent_id \
                         WHERE u.level = 'unit'",
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                for row in rows {
                    let (unit, district, state) = row.map_err(tokio_rusqlite::Error::Error)?;
                    entries.push(LocationEntry {
                        path: LocationPath::unit(state, district, unit),
                        level: LocationLevel::Unit,
                    });
                }

                Ok(entries)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }
}

// ============================================================================
// ConversationStore
// ============================================================================

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let next_seq: i64 = conn
                    .query_row(
                        "SELECT COALESCE(MAX(seq), -1) + 1 FROM conversation_turns \
                         WHERE session_id = ?1",
                        (&session_id,),
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                conn.execute(
                    "INSERT INTO conversation_turns \
                     (session_id, seq, role, content, at, provenance) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    (
                        &session_id,
                        next_seq,
                        &turn.role,
                        &turn.content,
                        turn.at.to_rfc3339(),
                        &turn.provenance,
                    ),
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                Ok(())
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                let mut stmt = conn
                    .prepare(
                        "SELECT role, content, at, provenance FROM conversation_turns \
                         WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2",
                    )
                    .map_err(tokio_rusqlite::Error::Error)?;
                let rows = stmt
                    .query_map((&session_id, limit as i64), |row| {
                        Ok(ConversationTurn {
                            role: row.get(0)?,
                            content: row.get(1)?,
                            at: parse_timestamp(&row.get::<_, String>(2)?),
                            provenance: row.get(3)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Error)?;
                let mut turns = Vec::new();
                for row in rows {
                    turns.push(row.map_err(tokio_rusqlite::Error::Error)?);
                }
                turns.reverse();
                Ok(turns)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }

    async fn clear(&self, session_id: &str) -> Result<usize, StoreError> {
        let session_id = session_id.to_string();
        self.conn
            .call(move |conn| -> tokio_rusqlite::Result<_> {
                conn.execute(
                    "DELETE FROM conversation_turns WHERE session_id = ?1",
                    (&session_id,),
                )
                .map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| StoreError::Sqlite(err.to_string()))
    }
}
