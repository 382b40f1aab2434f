use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::EntityCandidate;
use crate::column::ColumnType;
use crate::error::{Error, Result};
use crate::linking::ProcessingMetrics;

/// Outcome of checking one linking result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub score: f64,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Why a mention ended up without a usable selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ResultNote {
    NoCandidatesFound,
    Error(String),
}

impl std::fmt::Display for ResultNote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCandidatesFound => f.write_str("no candidates found"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<ResultNote>,
    /// Knowledge bases that failed for this mention, with the failure
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gateway_errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// The linking outcome for one mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingResult {
    pub mention: String,
    pub selected_candidate: Option<EntityCandidate>,
    pub candidates: Vec<EntityCandidate>,
    pub confidence: f64,
    pub is_ambiguous: bool,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
    pub used_knowledge_bases: Vec<String>,
    #[serde(default)]
    pub metadata: ResultMetadata,
}

impl LinkingResult {
    /// Builds a result from an already ranked candidate list; the head is selected.
    #[must_use]
    pub fn from_ranked(
        mention: impl Into<String>,
        ranked: Vec<EntityCandidate>,
        ambiguity_threshold: f64,
    ) -> Self {
        let selected = ranked.first().cloned();
        let confidence = selected.as_ref().map_or(0.0, EntityCandidate::confidence);
        let is_ambiguous = ranked.len() > 1 && confidence < ambiguity_threshold;
        let metadata = ResultMetadata {
            note: selected.is_none().then_some(ResultNote::NoCandidatesFound),
            ..ResultMetadata::default()
        };

        Self {
            mention: mention.into(),
            selected_candidate: selected,
            candidates: ranked,
            confidence,
            is_ambiguous,
            processing_time: Duration::ZERO,
            used_knowledge_bases: Vec::new(),
            metadata,
        }
    }

    /// The first-class empty state: confidence 0, never ambiguous.
    #[must_use]
    pub fn no_candidates(mention: impl Into<String>) -> Self {
        Self::from_ranked(mention, Vec::new(), 0.0)
    }

    #[must_use]
    pub fn failed(mention: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Self::no_candidates(mention);
        result.metadata.note = Some(ResultNote::Error(error.into()));
        result
    }

    #[must_use]
    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = elapsed;
        self
    }

    #[must_use]
    pub fn with_knowledge_bases(mut self, kbs: Vec<String>) -> Self {
        self.used_knowledge_bases = kbs;
        self
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        self.selected_candidate.is_some()
    }

    #[must_use]
    pub fn no_candidates_found(&self) -> bool {
        self.metadata.note == Some(ResultNote::NoCandidatesFound)
    }
}

/// All linking results for one column plus the column-level rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLinkingResult {
    pub column_name: String,
    pub column_type: ColumnType,
    pub results: Vec<LinkingResult>,
    pub success_rate: f64,
    pub average_confidence: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ColumnLinkingResult {
    pub fn new(
        column_name: impl Into<String>,
        column_type: ColumnType,
        results: Vec<LinkingResult>,
        metrics: &ProcessingMetrics,
        start_time: DateTime<Utc>,
    ) -> Result<Self> {
        let result = Self {
            column_name: column_name.into(),
            column_type,
            results,
            success_rate: metrics.success_rate(),
            average_confidence: metrics.average_confidence,
            start_time,
            end_time: Some(Utc::now()),
        };
        result.validate()?;
        Ok(result)
    }

    pub fn validate(&self) -> Result<()> {
        for rate in [self.success_rate, self.average_confidence] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfidence(rate));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn total_processing_time(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
