//! Shared domain types for the answer pipeline.
//!
//! Everything here is plain data: location hierarchy, groundwater status
//! classification, document categories, and the error kinds shared between
//! tiers and storage backends.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status classification derived from a stage-of-extraction percentage.
///
/// The thresholds are fixed by the national assessment methodology and are
/// applied inclusively on the lower bound:
///
/// | value        | status         |
/// |--------------|----------------|
/// | `p >= 100`   | Over-Exploited |
/// | `90 <= p`    | Critical       |
/// | `70 <= p`    | Semi-Critical  |
/// | `p < 70`     | Safe           |
///
/// # Examples
/// ```
/// use bhujal::types::GroundwaterStatus;
///
/// assert_eq!(GroundwaterStatus::classify(72.0), GroundwaterStatus::SemiCritical);
/// assert_eq!(GroundwaterStatus::classify(100.0), GroundwaterStatus::OverExploited);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundwaterStatus {
    Safe,
    SemiCritical,
    Critical,
    OverExploited,
}

impl GroundwaterStatus {
    /// Classify an extraction percentage into its status category.
    #[must_use]
    pub fn classify(percent: f64) -> Self {
        if percent >= 100.0 {
            Self::OverExploited
        } else if percent >= 90.0 {
            Self::Critical
        } else if percent >= 70.0 {
            Self::SemiCritical
        } else {
            Self::Safe
        }
    }

    /// Human-readable label used in prompts and citations.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::SemiCritical => "Semi-Critical",
            Self::Critical => "Critical",
            Self::OverExploited => "Over-Exploited",
        }
    }
}

impl std::fmt::Display for GroundwaterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category assigned to an uploaded document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    IdProof,
    Bill,
    Scheme,
    Health,
    Education,
    Legal,
    Financial,
    Other,
}

impl DocumentCategory {
    /// Stable string form used for storage and filtering.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdProof => "id_proof",
            Self::Bill => "bill",
            Self::Scheme => "scheme",
            Self::Health => "health",
            Self::Education => "education",
            Self::Legal => "legal",
            Self::Financial => "financial",
            Self::Other => "other",
        }
    }

    /// Parse the stable string form back into a category.
    ///
    /// Unknown strings map to [`DocumentCategory::Other`] rather than failing;
    /// category labels come from user-editable metadata.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "id_proof" => Self::IdProof,
            "bill" => Self::Bill,
            "scheme" => Self::Scheme,
            "health" => Self::Health,
            "education" => Self::Education,
            "legal" => Self::Legal,
            "financial" => Self::Financial,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for DocumentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of a node in the assessment location hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationLevel {
    State,
    District,
    Unit,
}

impl LocationLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::District => "district",
            Self::Unit => "unit",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "state" => Some(Self::State),
            "district" => Some(Self::District),
            "unit" => Some(Self::Unit),
            _ => None,
        }
    }
}

/// A fully-qualified path into the location hierarchy.
///
/// `state` is always present; `district` and `unit` narrow the path. A path
/// with a `unit` must also carry its `district` — the hierarchy is strict.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationPath {
    pub state: String,
    pub district: Option<String>,
    pub unit: Option<String>,
}

impl LocationPath {
    #[must_use]
    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            district: None,
            unit: None,
        }
    }

    #[must_use]
    pub fn district(state: impl Into<String>, district: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            district: Some(district.into()),
            unit: None,
        }
    }

    #[must_use]
    pub fn unit(
        state: impl Into<String>,
        district: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            state: state.into(),
            district: Some(district.into()),
            unit: Some(unit.into()),
        }
    }

    /// The deepest level this path addresses.
    #[must_use]
    pub fn level(&self) -> LocationLevel {
        if self.unit.is_some() {
            LocationLevel::Unit
        } else if self.district.is_some() {
            LocationLevel::District
        } else {
            LocationLevel::State
        }
    }

    /// The name of the deepest component.
    #[must_use]
    pub fn leaf_name(&self) -> &str {
        self.unit
            .as_deref()
            .or(self.district.as_deref())
            .unwrap_or(&self.state)
    }

    /// The path one level up, or `None` when already at state level.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        match self.level() {
            LocationLevel::Unit => Some(Self::district(
                self.state.clone(),
                self.district.clone().unwrap_or_default(),
            )),
            LocationLevel::District => Some(Self::state(self.state.clone())),
            LocationLevel::State => None,
        }
    }
}

impl std::fmt::Display for LocationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(unit) = &self.unit {
            write!(f, "{unit}, ")?;
        }
        if let Some(district) = &self.district {
            write!(f, "{district}, ")?;
        }
        f.write_str(&self.state)
    }
}

/// A single authoritative numeric groundwater fact.
///
/// Exactly one record exists per (location, metric, year). The status is
/// derived from the value at construction time and never stored
/// independently of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub location: LocationPath,
    pub metric: String,
    pub value: f64,
    pub unit: String,
    pub year: i32,
    pub status: GroundwaterStatus,
    pub recorded_at: DateTime<Utc>,
}

impl AssessmentRecord {
    /// Build a record, deriving the status from the value.
    #[must_use]
    pub fn new(
        location: LocationPath,
        metric: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            location,
            metric: metric.into(),
            value,
            unit: unit.into(),
            year,
            status: GroundwaterStatus::classify(value),
            recorded_at: Utc::now(),
        }
    }
}

/// Identifies which evidence tier an operation or failure belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierKind {
    Structured,
    Semantic,
    Web,
    Renderer,
}

impl TierKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Semantic => "semantic",
            Self::Web => "web",
            Self::Renderer => "renderer",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by storage backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Underlying sqlite failure (connection, statement, or extension).
    #[error("sqlite error: {0}")]
    #[diagnostic(code(bhujal::store::sqlite))]
    Sqlite(String),

    /// JSON (de)serialization of a stored column failed.
    #[error(transparent)]
    #[diagnostic(code(bhujal::store::serde))]
    Serde(#[from] serde_json::Error),

    /// A write violated a data-model invariant.
    #[error("constraint violated: {0}")]
    #[diagnostic(
        code(bhujal::store::constraint),
        help("Check the location hierarchy: a child record requires its parent to exist.")
    )]
    Constraint(String),
}

/// Recoverable failure of one evidence tier.
///
/// The composer treats every variant the same way: log it and continue with
/// the evidence gathered so far. Nothing of this kind is fatal to a request.
#[derive(Debug, Error, Diagnostic)]
pub enum TierError {
    #[error("{tier} tier timed out")]
    #[diagnostic(code(bhujal::tier::timeout))]
    Timeout { tier: TierKind },

    #[error("{tier} tier unavailable: {message}")]
    #[diagnostic(code(bhujal::tier::unavailable))]
    Unavailable { tier: TierKind, message: String },
}

impl TierError {
    #[must_use]
    pub fn unavailable(tier: TierKind, err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            tier,
            message: err.to_string(),
        }
    }
}
