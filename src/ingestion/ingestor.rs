//! Document ingestion: validate, chunk, embed, and persist.
//!
//! The ingestor is the only writer of chunk rows. It embeds every chunk in
//! one batch, retrying transient provider failures with exponential backoff;
//! when the provider stays down the chunks are stored without embeddings and
//! flagged for reindexing, so the document remains lexical-searchable rather
//! than lost. The final write is a single transactional replace keyed by
//! document id, which makes re-ingestion idempotent.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ChunkingConfig, RetryConfig};
use crate::embeddings::EmbeddingProvider;
use crate::stores::{ChunkRecord, ChunkStore, DocumentRecord};
use crate::types::{DocumentCategory, StoreError};

use super::chunker::TextChunker;

/// Errors rejected at the ingestion boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    /// The document has no extracted text. Not retried.
    #[error("document has no extracted text")]
    #[diagnostic(
        code(bhujal::ingest::empty_content),
        help("Run text extraction before ingesting, or delete the upload.")
    )]
    EmptyContent,

    /// The embedding provider is unreachable and the operation cannot
    /// proceed in degraded mode (only `reindex` surfaces this).
    #[error("embedding provider unavailable: {0}")]
    #[diagnostic(code(bhujal::ingest::representation_unavailable))]
    RepresentationUnavailable(String),

    /// The backing store failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StoreError),
}

/// A document handed to [`DocumentIngestor::ingest`].
#[derive(Clone, Debug)]
pub struct NewDocument {
    /// Re-use an existing id to replace a previous ingestion of the same
    /// document; `None` mints a fresh one.
    pub id: Option<String>,
    pub owner: String,
    pub title: String,
    pub category: DocumentCategory,
    pub tags: Vec<String>,
    /// Raw extracted text. Must be non-blank.
    pub text: String,
    /// Local-only documents are persisted but excluded from search.
    pub local_only: bool,
}

impl NewDocument {
    #[must_use]
    pub fn new(owner: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: None,
            owner: owner.into(),
            title: title.into(),
            category: DocumentCategory::Other,
            tags: Vec::new(),
            text: text.into(),
            local_only: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: DocumentCategory) -> Self {
        self.category = category;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    /// Derive category and tags from the title via the rule table, unless
    /// the caller already supplied them.
    #[must_use]
    pub fn auto_categorize(mut self) -> Self {
        if self.category == DocumentCategory::Other && self.tags.is_empty() {
            let (category, tags) = crate::rules::categorize(&self.title);
            self.category = category;
            self.tags = tags;
        }
        self
    }
}

/// Whether every chunk of an ingested document got an embedding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStatus {
    /// All chunks are embedded and semantic-search-eligible.
    Indexed,
    /// Some chunks were stored without embeddings and are flagged
    /// `needs_reindex`; they participate in lexical search only.
    Degraded { missing_embeddings: usize },
}

/// Result of a successful ingestion.
#[derive(Clone, Debug)]
pub struct IngestReceipt {
    pub document_id: String,
    pub chunk_count: usize,
    pub status: IngestStatus,
}

/// Splits, embeds, and persists documents.
pub struct DocumentIngestor {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    retry: RetryConfig,
}

impl DocumentIngestor {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker: TextChunker::new(chunking),
            retry,
        }
    }

    /// Ingest a document: chunk, embed, and transactionally replace any
    /// previous chunks stored under the same id.
    pub async fn ingest(&self, document: NewDocument) -> Result<IngestReceipt, IngestError> {
        let normalized = TextChunker::normalize(&document.text);
        if normalized.trim().is_empty() {
            return Err(IngestError::EmptyContent);
        }

        let document_id = document
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let uploaded_at = Utc::now();

        let spans = self.chunker.chunk(&normalized);
        let texts: Vec<String> = spans.iter().map(|span| span.text.clone()).collect();
        let embeddings = self.embed_with_retry(&texts).await;
        let missing = if embeddings.is_some() { 0 } else { spans.len() };

        let record = DocumentRecord {
            id: document_id.clone(),
            owner: document.owner,
            title: document.title,
            category: document.category,
            tags: document.tags,
            text: Some(normalized),
            uploaded_at,
            local_only: document.local_only,
        };

        let chunks: Vec<ChunkRecord> = spans
            .iter()
            .map(|span| ChunkRecord {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                ordinal: span.ordinal,
                content: span.text.clone(),
                embedding: embeddings
                    .as_ref()
                    .map(|vectors| vectors[span.ordinal].clone()),
                needs_reindex: embeddings.is_none(),
                title: record.title.clone(),
                category: record.category,
                tags: record.tags.clone(),
                local_only: record.local_only,
                uploaded_at,
            })
            .collect();

        let chunk_count = chunks.len();
        self.store.upsert_document(&record, chunks).await?;

        let status = if missing == 0 {
            IngestStatus::Indexed
        } else {
            warn!(
                document_id = %document_id,
                missing, "stored document without embeddings; flagged for reindex"
            );
            IngestStatus::Degraded {
                missing_embeddings: missing,
            }
        };
        info!(document_id = %document_id, chunk_count, "document ingested");

        Ok(IngestReceipt {
            document_id,
            chunk_count,
            status,
        })
    }

    /// Re-embed chunks that were stored in degraded mode.
    ///
    /// Returns the number of chunks repaired. If the embedding provider is
    /// still unavailable the chunks stay flagged and
    /// [`IngestError::RepresentationUnavailable`] is returned.
    pub async fn reindex(&self) -> Result<usize, IngestError> {
        let pending = self.store.chunks_needing_reindex().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending.iter().map(|chunk| chunk.content.clone()).collect();
        let embeddings = self
            .embed_with_retry(&texts)
            .await
            .ok_or_else(|| {
                IngestError::RepresentationUnavailable(format!(
                    "{} chunks still pending",
                    pending.len()
                ))
            })?;

        let updates: Vec<(String, Vec<f32>)> = pending
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| (chunk.id, embedding))
            .collect();
        let repaired = updates.len();
        self.store.set_embeddings(updates).await?;
        info!(repaired, "reindexed degraded chunks");
        Ok(repaired)
    }

    /// Embed with bounded retries; `None` after exhaustion means callers
    /// should degrade rather than fail.
    async fn embed_with_retry(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Some(Vec::new());
        }
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.embedder.embed(texts).await {
                Ok(embeddings) if embeddings.len() == texts.len() => return Some(embeddings),
                Ok(embeddings) => {
                    warn!(
                        expected = texts.len(),
                        got = embeddings.len(),
                        "embedding batch came back misaligned"
                    );
                    return None;
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(%err, attempt, ?delay, "embedding attempt failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, attempt, "embedding attempts exhausted");
                    return None;
                }
            }
        }
    }
}
