//! Configuration for the pipeline and its external collaborators.
//!
//! All knobs have working defaults; builder-style `with_*` methods override
//! them. Endpoint settings for hosted services resolve through environment
//! variables (loaded via `dotenvy`) so deployments never hard-code keys.

use std::time::Duration;

/// How documents are split into chunks.
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    /// Target chunk length in characters. The last chunk may be shorter.
    pub target_chars: usize,
    /// Number of characters shared between consecutive chunks.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: 800,
            overlap_chars: 100,
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub fn new(target_chars: usize, overlap_chars: usize) -> Self {
        // A zero step would loop forever; clamp the overlap below the target.
        let overlap_chars = overlap_chars.min(target_chars.saturating_sub(1));
        Self {
            target_chars: target_chars.max(1),
            overlap_chars,
        }
    }

    /// Characters advanced between chunk starts.
    #[must_use]
    pub fn step(&self) -> usize {
        self.target_chars - self.overlap_chars
    }
}

/// Bounded retry with exponential backoff for transient external failures.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (`attempt` is 1-based; attempt 1 is the
    /// first *retry*). Doubles each attempt: 200ms, 400ms, 800ms, ...
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Semantic/lexical search behavior.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    /// Maximum hits returned from one search call.
    pub top_k: usize,
    /// Hits scoring below this are not counted as usable evidence.
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.35,
        }
    }
}

/// Answer-composer decision thresholds and timeouts.
#[derive(Clone, Debug)]
pub struct ComposerConfig {
    /// Minimum usable semantic hits before web fallback is skipped.
    pub min_evidence: usize,
    /// Semantic hits scoring below this do not count toward `min_evidence`.
    pub min_evidence_score: f32,
    /// Web results requested when the fallback runs.
    pub web_results: usize,
    /// Conversation turns handed to the renderer for context.
    pub history_turns: usize,
    /// Per-tier timeout (structured, semantic, web).
    pub tier_timeout: Duration,
    /// Timeout for the language renderer call, retries included.
    pub render_timeout: Duration,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            min_evidence: 2,
            min_evidence_score: 0.35,
            web_results: 5,
            history_turns: 10,
            tier_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(60),
        }
    }
}

/// Connection settings for an OpenAI-compatible HTTP endpoint.
///
/// Used for both the embedding service and the completion service; the two
/// resolve from different environment variables.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl EndpointConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Embedding endpoint from `BHUJAL_EMBEDDINGS_URL` / `BHUJAL_EMBEDDINGS_MODEL`
    /// / `BHUJAL_API_KEY`, with local-server defaults.
    #[must_use]
    pub fn embeddings_from_env() -> Self {
        dotenvy::dotenv().ok();
        let base_url = std::env::var("BHUJAL_EMBEDDINGS_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let model = std::env::var("BHUJAL_EMBEDDINGS_MODEL")
            .unwrap_or_else(|_| "nomic-embed-text".to_string());
        let mut config = Self::new(base_url, model);
        if let Ok(key) = std::env::var("BHUJAL_API_KEY") {
            config.api_key = Some(key);
        }
        config
    }

    /// Completion endpoint from `BHUJAL_COMPLETIONS_URL` / `BHUJAL_COMPLETIONS_MODEL`
    /// / `BHUJAL_API_KEY`, with local-server defaults.
    #[must_use]
    pub fn completions_from_env() -> Self {
        dotenvy::dotenv().ok();
        let base_url = std::env::var("BHUJAL_COMPLETIONS_URL")
            .unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let model = std::env::var("BHUJAL_COMPLETIONS_MODEL")
            .unwrap_or_else(|_| "llama3.1".to_string());
        let mut config = Self::new(base_url, model);
        if let Ok(key) = std::env::var("BHUJAL_API_KEY") {
            config.api_key = Some(key);
        }
        config
    }
}

/// Top-level bundle of pipeline configuration.
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub embed_retry: RetryConfig,
    pub search: SearchConfig,
    pub composer: ComposerConfig,
}

impl PipelineConfig {
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[must_use]
    pub fn with_embed_retry(mut self, retry: RetryConfig) -> Self {
        self.embed_retry = retry;
        self
    }

    #[must_use]
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub fn with_composer(mut self, composer: ComposerConfig) -> Self {
        self.composer = composer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_clamps_overlap_below_target() {
        let config = ChunkingConfig::new(100, 100);
        assert_eq!(config.overlap_chars, 99);
        assert_eq!(config.step(), 1);

        let config = ChunkingConfig::new(1000, 100);
        assert_eq!(config.step(), 900);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(800));
    }
}
