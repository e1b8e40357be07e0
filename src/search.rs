//! Semantic search with lexical fallback.
//!
//! The query is embedded with the same provider the ingestor used, and
//! ranked against embedded chunks by cosine similarity. Chunks stored in
//! degraded mode (no embedding) are still reachable through keyword
//! matching, and a full provider outage downgrades the whole search to
//! lexical instead of failing. Semantic hits rank ahead of lexical hits at
//! equal relevance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::SearchConfig;
use crate::embeddings::EmbeddingProvider;
use crate::stores::{ChunkStore, MatchMode, SearchFilters, SearchHit};
use crate::types::{TierError, TierKind};

/// Seam the composer drives; lets tests count invocations with a double.
#[async_trait]
pub trait SemanticTier: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TierError>;
}

/// Tokenize query text for lexical matching: lowercase words of three or
/// more characters, deduplicated in order.
#[must_use]
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in query.unicode_words() {
        if word.chars().count() < 3 {
            continue;
        }
        let term = word.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Hybrid semantic + lexical retrieval over a [`ChunkStore`].
pub struct SemanticSearch {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SemanticSearch {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.remove(0)),
            Ok(_) => None,
            Err(err) => {
                warn!(%err, "query embedding failed; falling back to lexical search");
                None
            }
        }
    }
}

#[async_trait]
impl SemanticTier for SemanticSearch {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TierError> {
        let top_k = self.config.top_k;
        let terms = query_terms(query);

        let (mut hits, lexical_scope_unembedded) = match self.embed_query(query).await {
            Some(embedding) => {
                let semantic = self
                    .store
                    .search_semantic(&embedding, filters, top_k)
                    .await
                    .map_err(|err| TierError::unavailable(TierKind::Semantic, err))?;
                (semantic, true)
            }
            // Provider down: every chunk is fair game for keywords.
            None => (Vec::new(), false),
        };

        let lexical = self
            .store
            .search_lexical(&terms, filters, top_k, lexical_scope_unembedded)
            .await
            .map_err(|err| TierError::unavailable(TierKind::Semantic, err))?;

        for hit in lexical {
            if !hits.iter().any(|existing| existing.chunk.id == hit.chunk.id) {
                hits.push(hit);
            }
        }

        // Highest score first; semantic outranks lexical at equal score,
        // then most recent upload wins.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match (a.mode, b.mode) {
                    (MatchMode::Semantic, MatchMode::Lexical) => std::cmp::Ordering::Less,
                    (MatchMode::Lexical, MatchMode::Semantic) => std::cmp::Ordering::Greater,
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| b.chunk.uploaded_at.cmp(&a.chunk.uploaded_at))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{MockEmbeddingProvider, UnavailableEmbeddingProvider};
    use crate::stores::{ChunkRecord, DocumentRecord};
    use crate::types::{DocumentCategory, StoreError};
    use chrono::Utc;
    use parking_lot::Mutex;

    /// In-memory store double with naive cosine and keyword scoring.
    struct FakeChunkStore {
        chunks: Mutex<Vec<ChunkRecord>>,
    }

    impl FakeChunkStore {
        fn with_chunks(chunks: Vec<ChunkRecord>) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(chunks),
            })
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[async_trait]
    impl ChunkStore for FakeChunkStore {
        async fn upsert_document(
            &self,
            _document: &DocumentRecord,
            chunks: Vec<ChunkRecord>,
        ) -> Result<(), StoreError> {
            self.chunks.lock().extend(chunks);
            Ok(())
        }

        async fn delete_document(&self, _document_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn get_document(
            &self,
            _document_id: &str,
        ) -> Result<Option<DocumentRecord>, StoreError> {
            Ok(None)
        }

        async fn chunks_for_document(
            &self,
            _document_id: &str,
        ) -> Result<Vec<ChunkRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn chunks_needing_reindex(&self) -> Result<Vec<ChunkRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn set_embeddings(
            &self,
            _updates: Vec<(String, Vec<f32>)>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn search_semantic(
            &self,
            query_embedding: &[f32],
            _filters: &SearchFilters,
            top_k: usize,
        ) -> Result<Vec<SearchHit>, StoreError> {
            let mut hits: Vec<SearchHit> = self
                .chunks
                .lock()
                .iter()
                .filter(|chunk| !chunk.local_only)
                .filter_map(|chunk| {
                    chunk.embedding.as_ref().map(|embedding| SearchHit {
                        chunk: chunk.clone(),
                        score: cosine(embedding, query_embedding),
                        mode: MatchMode::Semantic,
                    })
                })
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn search_lexical(
            &self,
            terms: &[String],
            _filters: &SearchFilters,
            top_k: usize,
            unembedded_only: bool,
        ) -> Result<Vec<SearchHit>, StoreError> {
            let mut hits: Vec<SearchHit> = self
                .chunks
                .lock()
                .iter()
                .filter(|chunk| !chunk.local_only)
                .filter(|chunk| !unembedded_only || chunk.embedding.is_none())
                .map(|chunk| {
                    let haystack = chunk.content.to_lowercase();
                    let matched =
                        terms.iter().filter(|term| haystack.contains(*term)).count();
                    SearchHit {
                        chunk: chunk.clone(),
                        score: matched as f32 / terms.len().max(1) as f32,
                        mode: MatchMode::Lexical,
                    }
                })
                .filter(|hit| hit.score > 0.0)
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            hits.truncate(top_k);
            Ok(hits)
        }

        async fn count_chunks(&self) -> Result<usize, StoreError> {
            Ok(self.chunks.lock().len())
        }
    }

    fn chunk(id: &str, content: &str, embedding: Option<Vec<f32>>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            document_id: "doc".to_string(),
            ordinal: 0,
            content: content.to_string(),
            needs_reindex: embedding.is_none(),
            embedding,
            title: "Test".to_string(),
            category: DocumentCategory::Other,
            tags: Vec::new(),
            local_only: false,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn query_terms_deduplicate_and_drop_short_words() {
        assert_eq!(
            query_terms("is the The water WATER safe in 22"),
            vec!["the".to_string(), "water".to_string(), "safe".to_string()]
        );
    }

    #[tokio::test]
    async fn unembedded_chunks_surface_through_lexical_fallback() {
        let embedder = Arc::new(MockEmbeddingProvider::new());
        let embedded = embedder
            .embed(&["drip irrigation saves groundwater".to_string()])
            .await
            .unwrap()
            .remove(0);

        let store = FakeChunkStore::with_chunks(vec![
            chunk("a", "drip irrigation saves groundwater", Some(embedded)),
            chunk("b", "rainwater harvesting recharges aquifers", None),
        ]);
        let search = SemanticSearch::new(store, embedder, SearchConfig::default());

        let hits = search
            .search("rainwater harvesting aquifers", &SearchFilters::default())
            .await
            .unwrap();

        assert!(hits.iter().any(|hit| hit.chunk.id == "b"
            && hit.mode == MatchMode::Lexical));
    }

    #[tokio::test]
    async fn provider_outage_degrades_to_lexical_over_everything() {
        let store = FakeChunkStore::with_chunks(vec![
            chunk("a", "borewell depth norms", Some(vec![1.0, 0.0])),
            chunk("b", "borewell recharge pits", None),
        ]);
        let search = SemanticSearch::new(
            store,
            Arc::new(UnavailableEmbeddingProvider),
            SearchConfig::default(),
        );

        let hits = search
            .search("borewell recharge", &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.mode == MatchMode::Lexical));
    }

    #[tokio::test]
    async fn results_cap_at_top_k() {
        let chunks: Vec<ChunkRecord> = (0..30)
            .map(|i| chunk(&format!("c{i}"), "groundwater recharge notes", None))
            .collect();
        let store = FakeChunkStore::with_chunks(chunks);
        let search = SemanticSearch::new(
            store,
            Arc::new(UnavailableEmbeddingProvider),
            SearchConfig {
                top_k: 5,
                ..SearchConfig::default()
            },
        );

        let hits = search
            .search("groundwater recharge", &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);
    }

    /// Embedder returning the same axis-aligned vector for every input, so
    /// self-similarity is exactly 1.0 and tie-breaking is observable.
    struct FixedEmbedder;

    #[async_trait]
    impl crate::embeddings::EmbeddingProvider for FixedEmbedder {
        async fn embed(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, crate::embeddings::EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn id(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn semantic_hits_outrank_lexical_at_equal_score() {
        let text = "water conservation methods";
        let store = FakeChunkStore::with_chunks(vec![
            chunk("lex", text, None),
            chunk("sem", text, Some(vec![1.0, 0.0])),
        ]);
        let search = SemanticSearch::new(store, Arc::new(FixedEmbedder), SearchConfig::default());

        let hits = search
            .search(text, &SearchFilters::default())
            .await
            .unwrap();

        // Both score 1.0 against this query; the semantic hit must lead.
        assert_eq!(hits[0].chunk.id, "sem");
        assert_eq!(hits[0].mode, MatchMode::Semantic);
    }
}
