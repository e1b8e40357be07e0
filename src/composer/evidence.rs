//! Per-request evidence accumulation.
//!
//! Evidence items are ephemeral: they exist for one composition call, get
//! rendered into the prompt and the citation footer, and are dropped. The
//! bundle keeps tier grouping stable (structured, then semantic, then web)
//! no matter the insertion order, so prompt construction is deterministic.

use serde::{Deserialize, Serialize};

use crate::stores::SearchHit;
use crate::types::{AssessmentRecord, TierKind};
use crate::web::WebResult;

/// Tier-specific payload of one evidence item.
#[derive(Clone, Debug)]
pub enum EvidencePayload {
    Structured {
        record: AssessmentRecord,
        /// Set when the record is an ancestor aggregate, not an exact match
        /// for the requested location.
        aggregate: bool,
    },
    Semantic(SearchHit),
    Web(WebResult),
}

/// One piece of evidence gathered by a tier.
#[derive(Clone, Debug)]
pub struct EvidenceItem {
    pub tier: TierKind,
    pub confidence: f32,
    pub provenance: String,
    pub payload: EvidencePayload,
}

/// Machine-readable summary of which tiers contributed to an answer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesSummary {
    pub structured_used: bool,
    pub semantic_count: usize,
    pub web_used: bool,
}

/// The ordered collection of tier outputs handed to the renderer.
#[derive(Clone, Debug, Default)]
pub struct EvidenceBundle {
    structured: Vec<EvidenceItem>,
    semantic: Vec<EvidenceItem>,
    web: Vec<EvidenceItem>,
}

impl EvidenceBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_structured(&mut self, record: AssessmentRecord, aggregate: bool, confidence: f32) {
        let provenance = if aggregate {
            format!(
                "groundwater assessment {} ({}, {}-level aggregate)",
                record.year,
                record.location,
                record.location.level().as_str()
            )
        } else {
            format!("groundwater assessment {} ({})", record.year, record.location)
        };
        self.structured.push(EvidenceItem {
            tier: TierKind::Structured,
            confidence,
            provenance,
            payload: EvidencePayload::Structured { record, aggregate },
        });
    }

    pub fn push_semantic(&mut self, hit: SearchHit) {
        let provenance = format!("'{}' (chunk {})", hit.chunk.title, hit.chunk.ordinal);
        self.semantic.push(EvidenceItem {
            tier: TierKind::Semantic,
            confidence: hit.score,
            provenance,
            payload: EvidencePayload::Semantic(hit),
        });
    }

    pub fn push_web(&mut self, result: WebResult) {
        self.web.push(EvidenceItem {
            tier: TierKind::Web,
            confidence: 0.2,
            provenance: result.url.clone(),
            payload: EvidencePayload::Web(result),
        });
    }

    #[must_use]
    pub fn structured_count(&self) -> usize {
        self.structured.len()
    }

    #[must_use]
    pub fn semantic_count(&self) -> usize {
        self.semantic.len()
    }

    #[must_use]
    pub fn web_count(&self) -> usize {
        self.web.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structured.is_empty() && self.semantic.is_empty() && self.web.is_empty()
    }

    /// Semantic hits that clear the relevance floor.
    #[must_use]
    pub fn usable_semantic(&self, min_score: f32) -> usize {
        self.semantic
            .iter()
            .filter(|item| item.confidence >= min_score)
            .count()
    }

    /// All items in tier order: structured, semantic, web.
    pub fn items(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.structured
            .iter()
            .chain(self.semantic.iter())
            .chain(self.web.iter())
    }

    #[must_use]
    pub fn summary(&self) -> SourcesSummary {
        SourcesSummary {
            structured_used: !self.structured.is_empty(),
            semantic_count: self.semantic.len(),
            web_used: !self.web.is_empty(),
        }
    }

    /// Deterministic evidence listing for the renderer prompt.
    #[must_use]
    pub fn prompt_block(&self) -> String {
        let mut out = String::new();
        for item in self.items() {
            match &item.payload {
                EvidencePayload::Structured { record, aggregate } => {
                    out.push_str(&format!(
                        "[structured] {}: {} = {} {} in {} — status {}{}\n",
                        record.location,
                        record.metric,
                        record.value,
                        record.unit,
                        record.year,
                        record.status,
                        if *aggregate {
                            " (aggregate for a broader area than asked)"
                        } else {
                            ""
                        },
                    ));
                }
                EvidencePayload::Semantic(hit) => {
                    out.push_str(&format!(
                        "[document] {} (score {:.2}): {}\n",
                        item.provenance, hit.score, hit.chunk.content
                    ));
                }
                EvidencePayload::Web(result) => {
                    out.push_str(&format!(
                        "[web, unverified] {} — {} ({})\n",
                        result.title, result.snippet, result.url
                    ));
                }
            }
        }
        out
    }

    /// Machine-generated citation footer appended to every answer.
    #[must_use]
    pub fn sources_footer(&self) -> String {
        if self.is_empty() {
            return "Sources: none available.".to_string();
        }
        let mut parts = Vec::new();
        if !self.structured.is_empty() {
            parts.push(format!(
                "groundwater assessment records ({})",
                self.structured.len()
            ));
        }
        if !self.semantic.is_empty() {
            parts.push(format!("uploaded documents ({})", self.semantic.len()));
        }
        if !self.web.is_empty() {
            parts.push(format!(
                "general web information, not verified against local data ({})",
                self.web.len()
            ));
        }
        format!("Sources: {}.", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{ChunkRecord, MatchMode};
    use crate::types::{DocumentCategory, LocationPath};
    use chrono::Utc;

    fn record() -> AssessmentRecord {
        AssessmentRecord::new(
            LocationPath::district("Telangana", "Warangal"),
            "stage_of_extraction_percent",
            72.0,
            "%",
            2023,
        )
    }

    fn hit(score: f32) -> SearchHit {
        SearchHit {
            chunk: ChunkRecord {
                id: "c1".to_string(),
                document_id: "d1".to_string(),
                ordinal: 0,
                content: "scheme details".to_string(),
                embedding: None,
                needs_reindex: false,
                title: "Atal Bhujal Yojana".to_string(),
                category: DocumentCategory::Scheme,
                tags: vec!["scheme".to_string()],
                local_only: false,
                uploaded_at: Utc::now(),
            },
            score,
            mode: MatchMode::Semantic,
        }
    }

    #[test]
    fn items_come_out_in_tier_order_regardless_of_insertion() {
        let mut bundle = EvidenceBundle::new();
        bundle.push_web(WebResult {
            title: "t".to_string(),
            snippet: "s".to_string(),
            url: "https://example.org".to_string(),
        });
        bundle.push_semantic(hit(0.8));
        bundle.push_structured(record(), false, 1.0);

        let tiers: Vec<TierKind> = bundle.items().map(|item| item.tier).collect();
        assert_eq!(
            tiers,
            vec![TierKind::Structured, TierKind::Semantic, TierKind::Web]
        );
    }

    #[test]
    fn summary_reflects_tier_contributions() {
        let mut bundle = EvidenceBundle::new();
        bundle.push_structured(record(), true, 0.8);
        bundle.push_semantic(hit(0.9));
        bundle.push_semantic(hit(0.1));

        let summary = bundle.summary();
        assert!(summary.structured_used);
        assert_eq!(summary.semantic_count, 2);
        assert!(!summary.web_used);
        assert_eq!(bundle.usable_semantic(0.35), 1);
    }

    #[test]
    fn footer_marks_web_results_as_unverified() {
        let mut bundle = EvidenceBundle::new();
        bundle.push_web(WebResult {
            title: "t".to_string(),
            snippet: "s".to_string(),
            url: "https://example.org".to_string(),
        });
        assert_eq!(
            bundle.sources_footer(),
            "Sources: general web information, not verified against local data (1)."
        );
    }

    #[test]
    fn empty_bundle_has_an_explicit_footer() {
        assert_eq!(
            EvidenceBundle::new().sources_footer(),
            "Sources: none available."
        );
    }

    #[test]
    fn prompt_block_mentions_aggregate_fallback() {
        let mut bundle = EvidenceBundle::new();
        bundle.push_structured(record(), true, 0.8);
        assert!(bundle
            .prompt_block()
            .contains("aggregate for a broader area"));
    }
}
