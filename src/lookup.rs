//! Structured lookup: exact numeric answers from assessment records.
//!
//! The cheapest and most authoritative tier. Free-text location mentions
//! are normalized (case- and diacritic-insensitive) and matched against the
//! known location names; resolution falls back up the hierarchy
//! (unit → district → state) when the requested level has no record, and
//! same-named locations in different parents surface as an ambiguous
//! outcome instead of a guess.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::stores::{AssessmentStore, LocationEntry};
use crate::types::{AssessmentRecord, LocationLevel, LocationPath, TierError, TierKind};

/// Result of a structured lookup. Ambiguity is an outcome, not an error.
#[derive(Clone, Debug)]
pub enum LookupOutcome {
    /// One record at exactly the requested location.
    Exact(AssessmentRecord),
    /// No record at the requested level; this is the nearest ancestor's.
    Aggregate {
        record: AssessmentRecord,
        requested: LocationPath,
    },
    /// Multiple same-named locations matched; all candidate records.
    Ambiguous(Vec<AssessmentRecord>),
    NotFound,
}

/// Seam the composer drives; lets tests count invocations with a double.
#[async_trait]
pub trait StructuredTier: Send + Sync {
    /// Resolve a location and metric from free question text and look the
    /// record up.
    async fn lookup_question(
        &self,
        question: &str,
        location_hint: Option<&str>,
    ) -> Result<LookupOutcome, TierError>;
}

/// Metric aliases, first match wins. The default metric is the stage of
/// extraction, which is what status classification is defined over.
const METRIC_ALIASES: &[(&str, &str)] = &[
    ("stage of extraction", "stage_of_extraction_percent"),
    ("extraction", "stage_of_extraction_percent"),
    ("exploitation", "stage_of_extraction_percent"),
    ("recharge", "annual_recharge_mcm"),
    ("draft", "annual_draft_mcm"),
    ("water level", "water_level_m"),
    ("water table", "water_level_m"),
];

pub const DEFAULT_METRIC: &str = "stage_of_extraction_percent";

/// Map question text to a canonical metric name.
#[must_use]
pub fn resolve_metric(question: &str) -> &'static str {
    let question = question.to_lowercase();
    for (alias, metric) in METRIC_ALIASES {
        if question.contains(alias) {
            return metric;
        }
    }
    DEFAULT_METRIC
}

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("year pattern is a valid regex"));

/// Pull an explicit assessment year out of the question, if any.
#[must_use]
pub fn extract_year(question: &str) -> Option<i32> {
    YEAR_RE
        .find(question)
        .and_then(|m| m.as_str().parse().ok())
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'ē' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'ī' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Normalize a location mention: lowercase, fold diacritics, and replace
/// punctuation with spaces.
#[must_use]
pub fn normalize_mention(mention: &str) -> String {
    let folded: String = mention
        .to_lowercase()
        .chars()
        .map(fold_diacritic)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Structured numeric lookup over an [`AssessmentStore`].
pub struct StructuredLookup {
    store: Arc<dyn AssessmentStore>,
}

impl StructuredLookup {
    #[must_use]
    pub fn new(store: Arc<dyn AssessmentStore>) -> Self {
        Self { store }
    }

    /// Look up a specific mention/metric pair. `year` of `None` means the
    /// most recent assessment.
    pub async fn lookup(
        &self,
        mention: &str,
        metric: &str,
        year: Option<i32>,
    ) -> Result<LookupOutcome, TierError> {
        let entries = self
            .store
            .location_entries()
            .await
            .map_err(|err| TierError::unavailable(TierKind::Structured, err))?;
        let target = normalize_mention(mention);
        if target.is_empty() {
            return Ok(LookupOutcome::NotFound);
        }

        let matches: Vec<&LocationEntry> = entries
            .iter()
            .filter(|entry| normalize_mention(entry.path.leaf_name()) == target)
            .collect();
        self.resolve(matches, metric, year).await
    }

    /// Find every known location name mentioned in free question text.
    fn mentions<'a>(entries: &'a [LocationEntry], question: &str) -> Vec<&'a LocationEntry> {
        let padded = format!(" {} ", normalize_mention(question));
        entries
            .iter()
            .filter(|entry| {
                let name = normalize_mention(entry.path.leaf_name());
                !name.is_empty() && padded.contains(&format!(" {name} "))
            })
            .collect()
    }

    async fn resolve(
        &self,
        matches: Vec<&LocationEntry>,
        metric: &str,
        year: Option<i32>,
    ) -> Result<LookupOutcome, TierError> {
        if matches.is_empty() {
            return Ok(LookupOutcome::NotFound);
        }

        // Same-named ancestors of one lineage are not ambiguous; prefer the
        // deepest level mentioned and only then compare parents.
        let deepest = matches
            .iter()
            .map(|entry| entry.level)
            .max_by_key(|level| *level as u8)
            .unwrap_or(LocationLevel::State);
        let at_level: Vec<&LocationEntry> = matches
            .into_iter()
            .filter(|entry| entry.level == deepest)
            .collect();

        if at_level.len() > 1 {
            let mut candidates = Vec::new();
            for entry in &at_level {
                if let Some(record) = self.find_with_fallback(&entry.path, metric, year).await? {
                    candidates.push(record);
                }
            }
            debug!(count = candidates.len(), "ambiguous location mention");
            return Ok(if candidates.is_empty() {
                LookupOutcome::NotFound
            } else if candidates.len() == 1 {
                LookupOutcome::Exact(candidates.remove(0))
            } else {
                LookupOutcome::Ambiguous(candidates)
            });
        }

        let requested = at_level[0].path.clone();
        let mut path = Some(requested.clone());
        while let Some(current) = path {
            let found = self
                .store
                .find(&current, metric, year)
                .await
                .map_err(|err| TierError::unavailable(TierKind::Structured, err))?;
            if let Some(record) = found {
                return Ok(if current == requested {
                    LookupOutcome::Exact(record)
                } else {
                    LookupOutcome::Aggregate { record, requested }
                });
            }
            path = current.parent();
        }
        Ok(LookupOutcome::NotFound)
    }

    async fn find_with_fallback(
        &self,
        requested: &LocationPath,
        metric: &str,
        year: Option<i32>,
    ) -> Result<Option<AssessmentRecord>, TierError> {
        let mut path = Some(requested.clone());
        while let Some(current) = path {
            let found = self
                .store
                .find(&current, metric, year)
                .await
                .map_err(|err| TierError::unavailable(TierKind::Structured, err))?;
            if found.is_some() {
                return Ok(found);
            }
            path = current.parent();
        }
        Ok(None)
    }
}

#[async_trait]
impl StructuredTier for StructuredLookup {
    async fn lookup_question(
        &self,
        question: &str,
        location_hint: Option<&str>,
    ) -> Result<LookupOutcome, TierError> {
        let metric = resolve_metric(question);
        let year = extract_year(question);

        let entries = self
            .store
            .location_entries()
            .await
            .map_err(|err| TierError::unavailable(TierKind::Structured, err))?;

        let mut matches = Self::mentions(&entries, question);
        if matches.is_empty() {
            if let Some(hint) = location_hint {
                matches = Self::mentions(&entries, hint);
            }
        }
        self.resolve(matches, metric, year).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoreError;
    use parking_lot::Mutex;

    struct FakeAssessmentStore {
        records: Mutex<Vec<AssessmentRecord>>,
    }

    impl FakeAssessmentStore {
        fn with_records(records: Vec<AssessmentRecord>) -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(records),
            })
        }
    }

    #[async_trait]
    impl AssessmentStore for FakeAssessmentStore {
        async fn put_record(&self, record: &AssessmentRecord) -> Result<(), StoreError> {
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn find(
            &self,
            location: &LocationPath,
            metric: &str,
            year: Option<i32>,
        ) -> Result<Option<AssessmentRecord>, StoreError> {
            let records = self.records.lock();
            let mut matching: Vec<&AssessmentRecord> = records
                .iter()
                .filter(|r| {
                    r.location == *location
                        && r.metric == metric
                        && year.map(|y| r.year == y).unwrap_or(true)
                })
                .collect();
            matching.sort_by_key(|r| std::cmp::Reverse(r.year));
            Ok(matching.first().map(|r| (*r).clone()))
        }

        async fn location_entries(&self) -> Result<Vec<LocationEntry>, StoreError> {
            let records = self.records.lock();
            let mut entries = Vec::new();
            for record in records.iter() {
                let mut path = Some(record.location.clone());
                while let Some(current) = path {
                    let entry = LocationEntry {
                        level: current.level(),
                        path: current.clone(),
                    };
                    if !entries.contains(&entry) {
                        entries.push(entry);
                    }
                    path = current.parent();
                }
            }
            Ok(entries)
        }
    }

    fn warangal_record(value: f64) -> AssessmentRecord {
        AssessmentRecord::new(
            LocationPath::district("Telangana", "Warangal"),
            DEFAULT_METRIC,
            value,
            "%",
            2023,
        )
    }

    #[test]
    fn normalization_folds_case_punctuation_and_diacritics() {
        assert_eq!(normalize_mention("Warangāl,"), "warangal");
        assert_eq!(normalize_mention("  NORTH   Goa "), "north goa");
        assert_eq!(normalize_mention("--"), "");
    }

    #[test]
    fn metric_aliases_resolve_with_extraction_default() {
        assert_eq!(
            resolve_metric("what is the stage of extraction in pune"),
            "stage_of_extraction_percent"
        );
        assert_eq!(resolve_metric("annual recharge for my block"), "annual_recharge_mcm");
        assert_eq!(resolve_metric("is my area safe"), DEFAULT_METRIC);
    }

    #[test]
    fn years_are_extracted_when_present() {
        assert_eq!(extract_year("warangal extraction in 2022"), Some(2022));
        assert_eq!(extract_year("warangal extraction"), None);
    }

    #[tokio::test]
    async fn exact_match_at_requested_level() {
        let store = FakeAssessmentStore::with_records(vec![warangal_record(72.0)]);
        let lookup = StructuredLookup::new(store);

        match lookup.lookup("warangal", DEFAULT_METRIC, None).await.unwrap() {
            LookupOutcome::Exact(record) => assert_eq!(record.value, 72.0),
            other => panic!("expected exact outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_unit_falls_back_to_district_as_aggregate() {
        let mut district = warangal_record(92.0);
        district.year = 2023;
        let unit_only_location = AssessmentRecord::new(
            LocationPath::unit("Telangana", "Warangal", "Atmakur"),
            "annual_draft_mcm",
            4.2,
            "mcm",
            2023,
        );
        let store = FakeAssessmentStore::with_records(vec![district, unit_only_location]);
        let lookup = StructuredLookup::new(store);

        match lookup
            .lookup("atmakur", DEFAULT_METRIC, None)
            .await
            .unwrap()
        {
            LookupOutcome::Aggregate { record, requested } => {
                assert_eq!(record.location.level(), crate::types::LocationLevel::District);
                assert_eq!(requested.leaf_name(), "Atmakur");
            }
            other => panic!("expected aggregate outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_name_in_two_states_is_ambiguous() {
        let bilaspur_cg = AssessmentRecord::new(
            LocationPath::district("Chhattisgarh", "Bilaspur"),
            DEFAULT_METRIC,
            65.0,
            "%",
            2023,
        );
        let bilaspur_hp = AssessmentRecord::new(
            LocationPath::district("Himachal Pradesh", "Bilaspur"),
            DEFAULT_METRIC,
            41.0,
            "%",
            2023,
        );
        let store = FakeAssessmentStore::with_records(vec![bilaspur_cg, bilaspur_hp]);
        let lookup = StructuredLookup::new(store);

        match lookup.lookup("Bilaspur", DEFAULT_METRIC, None).await.unwrap() {
            LookupOutcome::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn question_text_resolves_location_metric_and_year() {
        let mut old = warangal_record(68.0);
        old.year = 2020;
        let store = FakeAssessmentStore::with_records(vec![warangal_record(72.0), old]);
        let lookup = StructuredLookup::new(store);

        match lookup
            .lookup_question("what was the extraction in Warangal in 2020?", None)
            .await
            .unwrap()
        {
            LookupOutcome::Exact(record) => {
                assert_eq!(record.year, 2020);
                assert_eq!(record.value, 68.0);
            }
            other => panic!("expected exact outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn location_hint_is_used_when_question_has_no_mention() {
        let store = FakeAssessmentStore::with_records(vec![warangal_record(72.0)]);
        let lookup = StructuredLookup::new(store);

        match lookup
            .lookup_question("is my area safe for borewells?", Some("Warangal"))
            .await
            .unwrap()
        {
            LookupOutcome::Exact(record) => assert_eq!(record.value, 72.0),
            other => panic!("expected exact outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_location_is_not_found() {
        let store = FakeAssessmentStore::with_records(vec![warangal_record(72.0)]);
        let lookup = StructuredLookup::new(store);

        assert!(matches!(
            lookup.lookup("Pune", DEFAULT_METRIC, None).await.unwrap(),
            LookupOutcome::NotFound
        ));
    }
}
