//! Embedding providers: the similarity representation used by the semantic
//! search tier.
//!
//! [`EmbeddingProvider`] abstracts the hosted service so the ingestor and
//! search tier never see HTTP. [`HttpEmbeddingProvider`] speaks the
//! OpenAI-compatible `/embeddings` protocol; [`MockEmbeddingProvider`]
//! produces deterministic bag-of-words vectors for tests and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::EndpointConfig;

/// Failure to compute a similarity representation.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    /// The provider could not be reached or returned a transport error.
    #[error("embedding request failed: {0}")]
    #[diagnostic(code(bhujal::embeddings::http))]
    Http(String),

    /// The request exceeded the configured timeout.
    #[error("embedding request timed out")]
    #[diagnostic(code(bhujal::embeddings::timeout))]
    Timeout,

    /// The provider answered with something other than the expected shape.
    #[error("unexpected embedding response: {0}")]
    #[diagnostic(code(bhujal::embeddings::response))]
    InvalidResponse(String),
}

/// Computes similarity representations for chunk and query text.
///
/// One provider instance is shared between ingestion and search so both
/// sides are guaranteed to produce vectors of the same kind.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts; the output is index-aligned with the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Provider identifier for telemetry.
    fn id(&self) -> &str;
}

// ============================================================================
// HTTP provider (OpenAI-compatible)
// ============================================================================

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// Provider backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EndpointConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| EmbeddingError::Http(err.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.config.model,
            "input": texts,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::Http(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http(format!("status {status}: {body}")));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::InvalidResponse(err.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }

    fn id(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Mock provider
// ============================================================================

/// Deterministic provider for tests and offline ingestion.
///
/// Each word hashes into one of `dim` buckets; the bucket counts are
/// L2-normalized. Texts sharing vocabulary therefore land near each other
/// under cosine similarity, which is all the tests need.
pub struct MockEmbeddingProvider {
    dim: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { dim: 64 }
    }

    #[must_use]
    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0f32; self.dim];
        for word in text.unicode_words() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            buckets[bucket] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        buckets
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn id(&self) -> &str {
        "mock"
    }
}

/// An always-failing provider, used to exercise degraded-mode paths.
pub struct UnavailableEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbeddingProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Http("provider offline".to_string()))
    }

    fn id(&self) -> &str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn http_provider_parses_openai_shaped_responses() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [
                    {"embedding": [0.1, 0.2]},
                    {"embedding": [0.3, 0.4]}
                ]
            }));
        });

        let provider =
            HttpEmbeddingProvider::new(EndpointConfig::new(server.base_url(), "embed-model"))
                .unwrap();
        let out = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![0.1, 0.2]);
        mock.assert();
    }

    #[tokio::test]
    async fn http_provider_rejects_misaligned_batches() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [{"embedding": [0.1]}]
            }));
        });

        let provider =
            HttpEmbeddingProvider::new(EndpointConfig::new(server.base_url(), "embed-model"))
                .unwrap();
        let result = provider
            .embed(&["first".to_string(), "second".to_string()])
            .await;

        assert!(matches!(result, Err(EmbeddingError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let texts = vec!["groundwater extraction in warangal".to_string()];
        let first = provider.embed(&texts).await.unwrap();
        let second = provider.embed(&texts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn mock_embeddings_are_unit_length() {
        let provider = MockEmbeddingProvider::new();
        let out = provider
            .embed(&["recharge draft extraction".to_string()])
            .await
            .unwrap();
        let norm = out[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated_ones() {
        let provider = MockEmbeddingProvider::new();
        let out = provider
            .embed(&[
                "rainwater harvesting for borewell recharge".to_string(),
                "borewell recharge with harvested rainwater".to_string(),
                "passport renewal application form".to_string(),
            ])
            .await
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&out[0], &out[1]) > dot(&out[0], &out[2]));
    }
}
