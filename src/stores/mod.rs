//! Storage backends for documents, chunks, and assessment records.
//!
//! This module defines backend-agnostic record types and the async traits
//! the pipeline is written against, so the tiers never depend on a specific
//! database:
//!
//! ```text
//!            ┌───────────────┐   ┌──────────────────┐
//!            │  ChunkStore   │   │ AssessmentStore  │
//!            │ (async CRUD + │   │ (hierarchy-aware │
//!            │  similarity)  │   │   numeric facts) │
//!            └───────┬───────┘   └────────┬─────────┘
//!                    └───────┬────────────┘
//!                            ▼
//!                    ┌──────────────┐
//!                    │ SqliteStore  │
//!                    │ (sqlite-vec) │
//!                    └──────────────┘
//! ```
//!
//! [`sqlite::SqliteStore`] is the bundled implementation; the traits keep
//! the door open for a server-grade backend without touching the tiers.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AssessmentRecord, DocumentCategory, LocationLevel, LocationPath, StoreError,
};

pub use sqlite::SqliteStore;

/// A stored document's metadata and extracted text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub owner: String,
    pub title: String,
    pub category: DocumentCategory,
    pub tags: Vec<String>,
    /// Extracted full text; populated by ingestion, absent for raw uploads.
    pub text: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    /// Local-only documents are stored but must never surface in search.
    pub local_only: bool,
}

/// A chunk row: one bounded slice of a document plus its search metadata.
///
/// Category, tags, title, upload time, and the local-only flag are inherited
/// from the parent document so filters never need a join at query time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub content: String,
    /// The similarity representation; `None` while `needs_reindex` is set.
    pub embedding: Option<Vec<f32>>,
    /// Set when the embedding service was unavailable at ingest time. The
    /// chunk is lexical-search-only until reindexed.
    pub needs_reindex: bool,
    pub title: String,
    pub category: DocumentCategory,
    pub tags: Vec<String>,
    pub local_only: bool,
    pub uploaded_at: DateTime<Utc>,
}

/// How a search hit was matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// Ranked by vector similarity.
    Semantic,
    /// Ranked by keyword overlap; used for unembedded chunks and provider
    /// outages.
    Lexical,
}

/// A ranked chunk returned from search.
#[derive(Clone, Debug)]
pub struct SearchHit {
    pub chunk: ChunkRecord,
    pub score: f32,
    pub mode: MatchMode,
}

/// Filters applied to semantic/lexical search.
///
/// Tags intersect: a chunk must carry every requested tag. An over-narrow
/// filter yields an empty result, never an error.
#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    pub category: Option<DocumentCategory>,
    pub tags: Vec<String>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub uploaded_before: Option<DateTime<Utc>>,
}

impl SearchFilters {
    #[must_use]
    pub fn with_category(mut self, category: DocumentCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_uploaded_after(mut self, after: DateTime<Utc>) -> Self {
        self.uploaded_after = Some(after);
        self
    }

    #[must_use]
    pub fn with_uploaded_before(mut self, before: DateTime<Utc>) -> Self {
        self.uploaded_before = Some(before);
        self
    }

    /// True when a chunk's tag set satisfies the requested intersection.
    #[must_use]
    pub fn tags_match(&self, chunk_tags: &[String]) -> bool {
        self.tags.iter().all(|tag| chunk_tags.contains(tag))
    }
}

/// A known location and its level, used for mention normalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationEntry {
    pub path: LocationPath,
    pub level: LocationLevel,
}

/// Chunk and document persistence with similarity search.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace a document and all of its chunks in one transaction.
    ///
    /// Either every chunk commits alongside the document row or nothing
    /// does; re-running with the same document id is idempotent
    /// (last-writer-wins, never interleaved partial state).
    async fn upsert_document(
        &self,
        document: &DocumentRecord,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), StoreError>;

    /// Delete a document; its chunks cascade. Returns the chunk count removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize, StoreError>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError>;

    /// All chunks of a document in ordinal order.
    async fn chunks_for_document(&self, document_id: &str)
        -> Result<Vec<ChunkRecord>, StoreError>;

    /// Chunks flagged `needs_reindex`, across all documents.
    async fn chunks_needing_reindex(&self) -> Result<Vec<ChunkRecord>, StoreError>;

    /// Attach embeddings to existing chunks, clearing their reindex flag.
    async fn set_embeddings(&self, updates: Vec<(String, Vec<f32>)>) -> Result<(), StoreError>;

    /// Vector similarity search over embedded, non-local chunks.
    ///
    /// Results are ordered by similarity descending, ties broken by most
    /// recent upload.
    async fn search_semantic(
        &self,
        query_embedding: &[f32],
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// Keyword search over non-local chunks.
    ///
    /// With `unembedded_only` set, only chunks lacking an embedding are
    /// considered (the degraded-mode complement to semantic search);
    /// otherwise all chunks are eligible (full provider outage).
    async fn search_lexical(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        top_k: usize,
        unembedded_only: bool,
    ) -> Result<Vec<SearchHit>, StoreError>;

    async fn count_chunks(&self) -> Result<usize, StoreError>;
}

/// Hierarchical numeric groundwater facts.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Insert or replace the record for (location, metric, year).
    ///
    /// Creates missing hierarchy rows for the record's own path, but a
    /// unit-level path missing its district is a constraint error.
    async fn put_record(&self, record: &AssessmentRecord) -> Result<(), StoreError>;

    /// Exact lookup at the given path and level. `year` of `None` returns
    /// the most recent assessment year.
    async fn find(
        &self,
        location: &LocationPath,
        metric: &str,
        year: Option<i32>,
    ) -> Result<Option<AssessmentRecord>, StoreError>;

    /// Every known location, for mention matching.
    async fn location_entries(&self) -> Result<Vec<LocationEntry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_filters_intersect_rather_than_union() {
        let filters = SearchFilters::default()
            .with_tags(vec!["scheme".to_string(), "government".to_string()]);

        let both = vec![
            "scheme".to_string(),
            "government".to_string(),
            "water".to_string(),
        ];
        let one = vec!["scheme".to_string()];

        assert!(filters.tags_match(&both));
        assert!(!filters.tags_match(&one));
        assert!(SearchFilters::default().tags_match(&[]));
    }
}
