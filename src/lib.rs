//! # Bhujal: Tiered Groundwater Answer Pipeline
//!
//! Bhujal answers natural-language questions about Indian groundwater data
//! by trying evidence tiers in a fixed, cheapest-first order and rendering
//! whatever it gathered into one cited answer:
//!
//! ```text
//! Uploaded documents ──► ingestion::DocumentIngestor ──► stores::SqliteStore
//!                                   │                         │
//!                                   └── embeddings ───────────┤
//!                                                             ▼
//! Question ──► composer::AnswerComposer ──┬─► lookup::StructuredLookup
//!                                         ├─► search::SemanticSearch
//!                                         ├─► web::DuckDuckGoSearch
//!                                         └─► renderer (text completion)
//!                                                             │
//! AnswerReply { answer_text, sources } ◄─────────────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! - **Tiers**: structured numeric lookup, semantic/lexical document
//!   search, and best-effort web search, tried in that order. Later tiers
//!   run only when earlier ones leave the composer short of evidence.
//! - **Evidence**: every fact is tagged with its tier and provenance; the
//!   final answer carries a machine-generated sources footer and a
//!   [`composer::SourcesSummary`].
//! - **Degraded mode**: embedding outages leave chunks lexical-searchable
//!   and reindexable; tier failures are logged and skipped; only a renderer
//!   outage degrades the reply text, to a pre-written fallback.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bhujal::composer::{AnswerComposer, QueryInput};
//! use bhujal::config::{EndpointConfig, PipelineConfig, RetryConfig};
//! use bhujal::embeddings::HttpEmbeddingProvider;
//! use bhujal::ingestion::DocumentIngestor;
//! use bhujal::lookup::StructuredLookup;
//! use bhujal::renderer::OpenAiCompatibleRenderer;
//! use bhujal::search::SemanticSearch;
//! use bhujal::stores::SqliteStore;
//! use bhujal::web::DuckDuckGoSearch;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let store = Arc::new(SqliteStore::open("bhujal.db").await?);
//! let embedder = Arc::new(HttpEmbeddingProvider::new(EndpointConfig::embeddings_from_env())?);
//!
//! let ingestor = DocumentIngestor::new(
//!     store.clone(),
//!     embedder.clone(),
//!     config.chunking.clone(),
//!     config.embed_retry.clone(),
//! );
//!
//! let composer = AnswerComposer::new(
//!     Arc::new(StructuredLookup::new(store.clone())),
//!     Arc::new(SemanticSearch::new(store.clone(), embedder, config.search.clone())),
//!     Arc::new(DuckDuckGoSearch::new(std::time::Duration::from_secs(10))?),
//!     Arc::new(OpenAiCompatibleRenderer::new(
//!         EndpointConfig::completions_from_env(),
//!         RetryConfig::default(),
//!     )?),
//! )
//! .with_conversations(store.clone());
//!
//! let reply = composer
//!     .answer(QueryInput::new("Is Warangal safe for new borewells?"))
//!     .await;
//! println!("{}", reply.answer_text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`composer`] - The tier-ordering state machine and evidence bundle
//! - [`ingestion`] - Chunking and the document ingest/reindex path
//! - [`lookup`] - Structured numeric lookup with hierarchical fallback
//! - [`search`] - Hybrid semantic + lexical retrieval
//! - [`web`] - Best-effort external search fallback
//! - [`renderer`] - Text-completion adapter with retry policy
//! - [`stores`] - Persistence traits and the sqlite-vec backend
//! - [`conversation`] - Injected chat-history persistence
//! - [`embeddings`] - Similarity representation providers
//! - [`rules`] - Declarative document categorization
//! - [`config`] / [`types`] / [`message`] - Shared configuration and data

pub mod composer;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod ingestion;
pub mod lookup;
pub mod message;
pub mod renderer;
pub mod rules;
pub mod search;
pub mod stores;
pub mod types;
pub mod web;

pub use composer::{AnswerComposer, AnswerReply, QueryInput, SourcesSummary};
pub use ingestion::{DocumentIngestor, IngestError, IngestReceipt, IngestStatus, NewDocument};
pub use types::{AssessmentRecord, GroundwaterStatus, LocationPath, TierError};
