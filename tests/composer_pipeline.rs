//! End-to-end composer scenarios with tier doubles.
//!
//! These tests pin the tier-ordering contract: which tiers run for which
//! question shapes, and how the composer degrades when tiers or the
//! renderer fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use bhujal::composer::{AnswerComposer, QueryInput};
use bhujal::conversation::{ConversationStore, MemoryConversationStore};
use bhujal::lookup::{LookupOutcome, StructuredTier};
use bhujal::message::ConversationTurn;
use bhujal::renderer::{CompletionModel, RenderError};
use bhujal::search::SemanticTier;
use bhujal::stores::{ChunkRecord, MatchMode, SearchFilters, SearchHit};
use bhujal::types::{AssessmentRecord, DocumentCategory, LocationPath, TierError, TierKind};
use bhujal::web::{WebResult, WebSearch};

// ============================================================================
// Tier doubles
// ============================================================================

struct CountingStructured {
    outcome: LookupOutcome,
    calls: AtomicUsize,
}

impl CountingStructured {
    fn new(outcome: LookupOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StructuredTier for CountingStructured {
    async fn lookup_question(
        &self,
        _question: &str,
        _location_hint: Option<&str>,
    ) -> Result<LookupOutcome, TierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

struct FailingStructured;

#[async_trait]
impl StructuredTier for FailingStructured {
    async fn lookup_question(
        &self,
        _question: &str,
        _location_hint: Option<&str>,
    ) -> Result<LookupOutcome, TierError> {
        Err(TierError::unavailable(TierKind::Structured, "db down"))
    }
}

struct CountingSemantic {
    hits: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl CountingSemantic {
    fn new(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            hits,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SemanticTier for CountingSemantic {
    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.clone())
    }
}

struct FailingSemantic;

#[async_trait]
impl SemanticTier for FailingSemantic {
    async fn search(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, TierError> {
        Err(TierError::unavailable(TierKind::Semantic, "index offline"))
    }
}

struct CountingWeb {
    results: Vec<WebResult>,
    calls: AtomicUsize,
}

impl CountingWeb {
    fn new(results: Vec<WebResult>) -> Arc<Self> {
        Arc::new(Self {
            results,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WebSearch for CountingWeb {
    async fn fallback_search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, TierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

struct FailingWeb;

#[async_trait]
impl WebSearch for FailingWeb {
    async fn fallback_search(
        &self,
        _query: &str,
        _max_results: usize,
    ) -> Result<Vec<WebResult>, TierError> {
        Err(TierError::Timeout {
            tier: TierKind::Web,
        })
    }
}

/// Renderer double that records the prompt it was handed.
struct RecordingRenderer {
    prompts: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl RecordingRenderer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionModel for RecordingRenderer {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<String, RenderError> {
        self.prompts.lock().push(turns.to_vec());
        Ok("Here is what the data shows.".to_string())
    }
}

struct FailingRenderer;

#[async_trait]
impl CompletionModel for FailingRenderer {
    async fn complete(&self, _turns: &[ConversationTurn]) -> Result<String, RenderError> {
        Err(RenderError::Exhausted {
            attempts: 3,
            message: "endpoint unreachable".to_string(),
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn warangal(value: f64) -> AssessmentRecord {
    AssessmentRecord::new(
        LocationPath::district("Telangana", "Warangal"),
        "stage_of_extraction_percent",
        value,
        "%",
        2023,
    )
}

fn scheme_hit(score: f32) -> SearchHit {
    SearchHit {
        chunk: ChunkRecord {
            id: "chunk-1".to_string(),
            document_id: "doc-1".to_string(),
            ordinal: 0,
            content: "Atal Bhujal Yojana supports community groundwater management.".to_string(),
            embedding: None,
            needs_reindex: false,
            title: "Atal Bhujal Yojana guidelines".to_string(),
            category: DocumentCategory::Scheme,
            tags: vec!["scheme".to_string()],
            local_only: false,
            uploaded_at: Utc::now(),
        },
        score,
        mode: MatchMode::Semantic,
    }
}

fn web_results(n: usize) -> Vec<WebResult> {
    (0..n)
        .map(|i| WebResult {
            title: format!("Result {i}"),
            snippet: "external information".to_string(),
            url: format!("https://example.org/{i}"),
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn exact_structured_answer_skips_semantic_and_web() {
    // A purely numeric question answered by one record leaves the other
    // tiers untouched.
    let structured = CountingStructured::new(LookupOutcome::Exact(warangal(72.0)));
    let semantic = CountingSemantic::new(vec![scheme_hit(0.9)]);
    let web = CountingWeb::new(web_results(3));
    let renderer = RecordingRenderer::new();

    let composer = AnswerComposer::new(
        structured.clone(),
        semantic.clone(),
        web.clone(),
        renderer.clone(),
    );

    let reply = composer
        .answer(QueryInput::new(
            "What is the extraction stage in Warangal?",
        ))
        .await;

    assert_eq!(structured.calls.load(Ordering::SeqCst), 1);
    assert_eq!(semantic.calls.load(Ordering::SeqCst), 0);
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);

    assert!(reply.sources.structured_used);
    assert_eq!(reply.sources.semantic_count, 0);
    assert!(!reply.sources.web_used);

    // The record reached the renderer with its derived status.
    let prompts = renderer.prompts.lock();
    let user_turn = &prompts[0].last().unwrap().content;
    assert!(user_turn.contains("Semi-Critical"));
    assert!(user_turn.contains("72"));
}

#[tokio::test]
async fn qualitative_question_keeps_structured_and_runs_semantic() {
    // "why ... schemes" gathers numeric and document evidence together.
    let structured = CountingStructured::new(LookupOutcome::Exact(warangal(92.0)));
    let semantic = CountingSemantic::new(vec![scheme_hit(0.85)]);
    let web = CountingWeb::new(web_results(3));
    let renderer = RecordingRenderer::new();

    let composer = AnswerComposer::new(
        structured.clone(),
        semantic.clone(),
        web.clone(),
        renderer.clone(),
    );

    let reply = composer
        .answer(QueryInput::new(
            "why is my area critical and what schemes help",
        ))
        .await;

    assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);
    assert!(reply.sources.structured_used);
    assert!(reply.sources.semantic_count >= 1);
    // Structured evidence was present, so the web tier stayed out.
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);

    let prompts = renderer.prompts.lock();
    let user_turn = &prompts[0].last().unwrap().content;
    assert!(user_turn.contains("Critical"));
    assert!(user_turn.contains("Atal Bhujal Yojana"));
}

#[tokio::test]
async fn unknown_location_with_no_documents_falls_back_to_web() {
    // Nothing local matches; three web results carry the answer.
    let structured = CountingStructured::new(LookupOutcome::NotFound);
    let semantic = CountingSemantic::new(Vec::new());
    let web = CountingWeb::new(web_results(3));
    let renderer = RecordingRenderer::new();

    let composer = AnswerComposer::new(
        structured.clone(),
        semantic.clone(),
        web.clone(),
        renderer.clone(),
    );

    let reply = composer
        .answer(QueryInput::new("groundwater rules in Ruritania"))
        .await;

    assert_eq!(web.calls.load(Ordering::SeqCst), 1);
    assert!(!reply.sources.structured_used);
    assert_eq!(reply.sources.semantic_count, 0);
    assert!(reply.sources.web_used);
    assert!(reply
        .answer_text
        .contains("general web information, not verified against local data"));
}

#[tokio::test]
async fn ambiguous_locations_become_candidates_and_semantic_still_runs() {
    let candidates = vec![warangal(72.0), {
        AssessmentRecord::new(
            LocationPath::district("Andhra Pradesh", "Warangal"),
            "stage_of_extraction_percent",
            55.0,
            "%",
            2023,
        )
    }];
    let structured = CountingStructured::new(LookupOutcome::Ambiguous(candidates));
    let semantic = CountingSemantic::new(vec![scheme_hit(0.8)]);
    let web = CountingWeb::new(web_results(2));
    let renderer = RecordingRenderer::new();

    let composer = AnswerComposer::new(
        structured.clone(),
        semantic.clone(),
        web.clone(),
        renderer.clone(),
    );

    let reply = composer
        .answer(QueryInput::new("extraction in Warangal"))
        .await;

    // Both candidates surface as structured evidence; no web fallback since
    // structured evidence exists.
    assert!(reply.sources.structured_used);
    assert_eq!(semantic.calls.load(Ordering::SeqCst), 1);
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);

    let prompts = renderer.prompts.lock();
    let user_turn = &prompts[0].last().unwrap().content;
    assert!(user_turn.contains("Telangana"));
    assert!(user_turn.contains("Andhra Pradesh"));
}

#[tokio::test]
async fn total_tier_failure_still_produces_a_friendly_answer() {
    // Everything fails, including the renderer; the reply is the static
    // fallback, not a panic or error.
    let composer = AnswerComposer::new(
        Arc::new(FailingStructured),
        Arc::new(FailingSemantic),
        Arc::new(FailingWeb),
        Arc::new(FailingRenderer),
    );

    let reply = composer
        .answer(QueryInput::new("is my block over-exploited?"))
        .await;

    assert!(reply
        .answer_text
        .contains("could not generate a full answer"));
    assert!(reply.answer_text.contains("Sources: none available."));
    assert!(!reply.sources.structured_used);
    assert_eq!(reply.sources.semantic_count, 0);
    assert!(!reply.sources.web_used);
}

#[tokio::test]
async fn renderer_failure_with_evidence_keeps_the_sources_summary() {
    let structured = CountingStructured::new(LookupOutcome::Exact(warangal(72.0)));
    let composer = AnswerComposer::new(
        structured,
        CountingSemantic::new(Vec::new()),
        CountingWeb::new(Vec::new()),
        Arc::new(FailingRenderer),
    );

    let reply = composer
        .answer(QueryInput::new("extraction stage in Warangal"))
        .await;

    // Degraded text, but the attribution still reflects gathered evidence.
    assert!(reply
        .answer_text
        .contains("could not generate a full answer"));
    assert!(reply.sources.structured_used);
    assert!(reply
        .answer_text
        .contains("groundwater assessment records (1)"));
}

#[tokio::test]
async fn tier_selection_is_deterministic_for_identical_input() {
    let structured = CountingStructured::new(LookupOutcome::Exact(warangal(72.0)));
    let semantic = CountingSemantic::new(vec![scheme_hit(0.9)]);
    let web = CountingWeb::new(web_results(1));
    let composer = AnswerComposer::new(
        structured.clone(),
        semantic.clone(),
        web.clone(),
        RecordingRenderer::new(),
    );

    let question = "What is the extraction stage in Warangal?";
    let first = composer.answer(QueryInput::new(question)).await;
    let second = composer.answer(QueryInput::new(question)).await;

    assert_eq!(first.sources, second.sources);
    assert_eq!(structured.calls.load(Ordering::SeqCst), 2);
    assert_eq!(semantic.calls.load(Ordering::SeqCst), 0);
    assert_eq!(web.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn conversation_turns_are_persisted_and_replayed() {
    let conversations = Arc::new(MemoryConversationStore::new());
    let structured = CountingStructured::new(LookupOutcome::Exact(warangal(72.0)));
    let renderer = RecordingRenderer::new();

    let composer = AnswerComposer::new(
        structured,
        CountingSemantic::new(Vec::new()),
        CountingWeb::new(Vec::new()),
        renderer.clone(),
    )
    .with_conversations(conversations.clone());

    composer
        .answer(QueryInput::new("extraction in Warangal").with_session("session-1"))
        .await;

    let history = conversations.history("session-1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].has_role(ConversationTurn::USER));
    assert!(history[1].has_role(ConversationTurn::ASSISTANT));
    assert!(history[1].provenance.as_deref().unwrap().contains("Sources:"));

    // The second question sees the stored history in its prompt.
    composer
        .answer(QueryInput::new("and what about recharge?").with_session("session-1"))
        .await;

    let prompts = renderer.prompts.lock();
    let second_prompt = &prompts[1];
    assert!(second_prompt
        .iter()
        .any(|turn| turn.content.contains("extraction in Warangal")));
}
