//! The answer composer: a fixed-order state machine over the evidence tiers.
//!
//! ```text
//! Start ──► TryStructured ──► TrySemantic ──► MaybeWebFallback ──► Render ──► Done
//!              │                                                    ▲
//!              └── exact record, no qualitative keywords ───────────┘
//! ```
//!
//! Tier failures and timeouts never abort a request: each tier's error is
//! logged and the machine moves on with whatever evidence it has. The only
//! degradation visible to a user is the pre-written fallback text used when
//! the renderer itself is unreachable; no raw provider error ever escapes.

pub mod evidence;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ComposerConfig;
use crate::conversation::ConversationStore;
use crate::lookup::{LookupOutcome, StructuredTier};
use crate::message::ConversationTurn;
use crate::renderer::CompletionModel;
use crate::search::SemanticTier;
use crate::stores::SearchFilters;
use crate::web::WebSearch;

pub use evidence::{EvidenceBundle, EvidenceItem, EvidencePayload, SourcesSummary};

/// System prompt for the language renderer. Kept static so rendering is
/// reproducible for identical evidence.
const SYSTEM_PROMPT: &str = "You are a groundwater information assistant for Indian citizens, \
farmers, and officials. Answer from the evidence provided: cite assessment figures exactly, \
summarize document excerpts faithfully, and clearly mark web results as unverified. If the \
evidence lists several same-named locations, ask the user which one they mean instead of \
guessing. If the evidence is insufficient, say so plainly. Be concise and practical.";

/// Pre-written degraded answer used when the renderer is unreachable.
const FALLBACK_ANSWER: &str = "I could not generate a full answer right now. The groundwater \
information service is temporarily unavailable — please try again in a little while. If this \
keeps happening, your question may still be answerable from the official assessment portal.";

/// Qualitative-context keywords: when present alongside an exact structured
/// hit, semantic search still runs to furnish supplementary evidence.
const QUALITATIVE_KEYWORDS: &[&str] = &[
    "why",
    "recommend",
    "recommendation",
    "scheme",
    "schemes",
    "yojana",
    "tips",
    "advice",
    "conserve",
    "conservation",
];

fn wants_qualitative_context(question: &str) -> bool {
    let lower = question.to_lowercase();
    let padded = format!(
        " {} ",
        lower
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
    );
    QUALITATIVE_KEYWORDS
        .iter()
        .any(|keyword| padded.contains(&format!(" {keyword} ")))
}

/// One user question plus its conversational context.
#[derive(Clone, Debug)]
pub struct QueryInput {
    pub question: String,
    /// Session key for reading/writing history through the conversation
    /// store. Without it the exchange is not persisted.
    pub session_id: Option<String>,
    /// Explicit history; when empty the composer loads it from the store.
    pub history: Vec<ConversationTurn>,
    pub location_hint: Option<String>,
}

impl QueryInput {
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: None,
            history: Vec::new(),
            location_hint: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_location_hint(mut self, hint: impl Into<String>) -> Self {
        self.location_hint = Some(hint.into());
        self
    }
}

/// The composed answer and its tier attribution.
#[derive(Clone, Debug)]
pub struct AnswerReply {
    pub answer_text: String,
    pub sources: SourcesSummary,
}

/// Pipeline states, in their fixed order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ComposerState {
    TryStructured,
    TrySemantic,
    MaybeWebFallback,
    Render,
    Done,
}

/// Orchestrates the tiers in strict order and renders one answer.
pub struct AnswerComposer {
    structured: Arc<dyn StructuredTier>,
    semantic: Arc<dyn SemanticTier>,
    web: Arc<dyn WebSearch>,
    renderer: Arc<dyn CompletionModel>,
    conversations: Option<Arc<dyn ConversationStore>>,
    config: ComposerConfig,
}

impl AnswerComposer {
    #[must_use]
    pub fn new(
        structured: Arc<dyn StructuredTier>,
        semantic: Arc<dyn SemanticTier>,
        web: Arc<dyn WebSearch>,
        renderer: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            structured,
            semantic,
            web,
            renderer,
            conversations: None,
            config: ComposerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ComposerConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer one question. This method never fails: every tier error is
    /// recovered, and renderer failure degrades to the static fallback.
    pub async fn answer(&self, input: QueryInput) -> AnswerReply {
        let question = input.question.clone();
        let history = self.resolve_history(&input).await;

        let mut bundle = EvidenceBundle::new();
        let mut structured_exact = false;
        let mut answer_text: Option<String> = None;

        let mut state = ComposerState::TryStructured;
        loop {
            debug!(state = ?state, "composer transition");
            match state {
                ComposerState::TryStructured => {
                    self.try_structured(&question, input.location_hint.as_deref(), &mut bundle, &mut structured_exact)
                        .await;
                    // An unambiguous record answers a purely numeric question
                    // outright; qualitative questions still gather context.
                    state = if structured_exact && !wants_qualitative_context(&question) {
                        ComposerState::Render
                    } else {
                        ComposerState::TrySemantic
                    };
                }
                ComposerState::TrySemantic => {
                    self.try_semantic(&question, &mut bundle).await;
                    let thin = bundle.structured_count() == 0
                        && bundle.usable_semantic(self.config.min_evidence_score)
                            < self.config.min_evidence;
                    state = if thin {
                        ComposerState::MaybeWebFallback
                    } else {
                        ComposerState::Render
                    };
                }
                ComposerState::MaybeWebFallback => {
                    self.try_web(&question, &mut bundle).await;
                    state = ComposerState::Render;
                }
                ComposerState::Render => {
                    answer_text = Some(self.render(&question, &bundle, &history).await);
                    state = ComposerState::Done;
                }
                ComposerState::Done => break,
            }
        }

        let answer_text = answer_text
            .unwrap_or_else(|| format!("{FALLBACK_ANSWER}\n\n{}", bundle.sources_footer()));

        self.persist_turns(&input, &question, &answer_text, &bundle)
            .await;

        AnswerReply {
            answer_text,
            sources: bundle.summary(),
        }
    }

    async fn resolve_history(&self, input: &QueryInput) -> Vec<ConversationTurn> {
        if !input.history.is_empty() {
            let skip = input
                .history
                .len()
                .saturating_sub(self.config.history_turns);
            return input.history[skip..].to_vec();
        }
        let (Some(session_id), Some(store)) = (&input.session_id, &self.conversations) else {
            return Vec::new();
        };
        match store.history(session_id, self.config.history_turns).await {
            Ok(history) => history,
            Err(err) => {
                warn!(%err, "conversation history unavailable; continuing without it");
                Vec::new()
            }
        }
    }

    async fn try_structured(
        &self,
        question: &str,
        location_hint: Option<&str>,
        bundle: &mut EvidenceBundle,
        structured_exact: &mut bool,
    ) {
        let attempt = tokio::time::timeout(
            self.config.tier_timeout,
            self.structured.lookup_question(question, location_hint),
        )
        .await;

        match attempt {
            Ok(Ok(LookupOutcome::Exact(record))) => {
                bundle.push_structured(record, false, 1.0);
                *structured_exact = true;
            }
            Ok(Ok(LookupOutcome::Aggregate { record, .. })) => {
                bundle.push_structured(record, true, 0.8);
                *structured_exact = true;
            }
            Ok(Ok(LookupOutcome::Ambiguous(candidates))) => {
                // All candidates become evidence; the renderer is instructed
                // to ask the user which one they meant.
                for record in candidates {
                    bundle.push_structured(record, false, 0.5);
                }
            }
            Ok(Ok(LookupOutcome::NotFound)) => {}
            Ok(Err(err)) => warn!(%err, "structured tier failed; continuing"),
            Err(_) => warn!("structured tier timed out; continuing"),
        }
    }

    async fn try_semantic(&self, question: &str, bundle: &mut EvidenceBundle) {
        let attempt = tokio::time::timeout(
            self.config.tier_timeout,
            self.semantic.search(question, &SearchFilters::default()),
        )
        .await;

        match attempt {
            Ok(Ok(hits)) => {
                for hit in hits {
                    bundle.push_semantic(hit);
                }
            }
            Ok(Err(err)) => warn!(%err, "semantic tier failed; continuing"),
            Err(_) => warn!("semantic tier timed out; continuing"),
        }
    }

    async fn try_web(&self, question: &str, bundle: &mut EvidenceBundle) {
        let attempt = tokio::time::timeout(
            self.config.tier_timeout,
            self.web.fallback_search(question, self.config.web_results),
        )
        .await;

        match attempt {
            Ok(Ok(results)) => {
                for result in results {
                    bundle.push_web(result);
                }
            }
            Ok(Err(err)) => warn!(%err, "web fallback failed; continuing"),
            Err(_) => warn!("web fallback timed out; continuing"),
        }
    }

    async fn render(
        &self,
        question: &str,
        bundle: &EvidenceBundle,
        history: &[ConversationTurn],
    ) -> String {
        let turns = self.build_prompt(question, bundle, history);
        let attempt =
            tokio::time::timeout(self.config.render_timeout, self.renderer.complete(&turns)).await;

        match attempt {
            Ok(Ok(text)) => format!("{}\n\n{}", text.trim_end(), bundle.sources_footer()),
            Ok(Err(err)) => {
                warn!(%err, "renderer failed; using static fallback");
                format!("{FALLBACK_ANSWER}\n\n{}", bundle.sources_footer())
            }
            Err(_) => {
                warn!("renderer timed out; using static fallback");
                format!("{FALLBACK_ANSWER}\n\n{}", bundle.sources_footer())
            }
        }
    }

    /// Deterministic prompt assembly: system prompt, recent history, then
    /// the question with its evidence block.
    fn build_prompt(
        &self,
        question: &str,
        bundle: &EvidenceBundle,
        history: &[ConversationTurn],
    ) -> Vec<ConversationTurn> {
        let mut turns = vec![ConversationTurn::system(SYSTEM_PROMPT)];
        turns.extend(
            history
                .iter()
                .filter(|turn| !turn.has_role(ConversationTurn::SYSTEM))
                .cloned(),
        );

        let content = if bundle.is_empty() {
            format!(
                "{question}\n\nNo local evidence was found for this question. Say so and \
                 suggest how the user might rephrase or where official data may exist."
            )
        } else {
            format!("{question}\n\nEvidence:\n{}", bundle.prompt_block())
        };
        turns.push(ConversationTurn::user(&content));
        turns
    }

    async fn persist_turns(
        &self,
        input: &QueryInput,
        question: &str,
        answer_text: &str,
        bundle: &EvidenceBundle,
    ) {
        let (Some(session_id), Some(store)) = (&input.session_id, &self.conversations) else {
            return;
        };
        if let Err(err) = store
            .append(session_id, ConversationTurn::user(question))
            .await
        {
            warn!(%err, "could not persist user turn");
        }
        let assistant =
            ConversationTurn::assistant(answer_text).with_provenance(bundle.sources_footer());
        if let Err(err) = store.append(session_id, assistant).await {
            warn!(%err, "could not persist assistant turn");
        }
    }
}
