use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::result::LinkingResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityVerdict {
    High,
    Medium,
    #[default]
    Low,
}

impl QualityVerdict {
    #[must_use]
    pub fn from_scores(average_confidence: f64, success_rate: f64) -> Self {
        if average_confidence >= 0.8 && success_rate >= 0.8 {
            Self::High
        } else if average_confidence >= 0.6 && success_rate >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The quality gate's view of a finished execution round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub average_confidence: f64,
    /// Share of mentions at or above `min_confidence`
    pub success_rate: f64,
    pub error_count: usize,
    pub min_confidence: f64,
    pub meets_confidence_threshold: bool,
    pub meets_success_rate_threshold: bool,
    pub verdict: QualityVerdict,
}

impl QualityReport {
    /// Averages run over every mention, including those with no selection.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn assess(
        results: &[LinkingResult],
        min_confidence: f64,
        min_success_rate: f64,
        error_count: usize,
    ) -> Self {
        let (average_confidence, success_rate) = if results.is_empty() {
            (0.0, 0.0)
        } else {
            let n = results.len() as f64;
            let total: f64 = results.iter().map(|r| r.confidence).sum();
            let passing = results.iter().filter(|r| r.confidence >= min_confidence).count();
            (total / n, passing as f64 / n)
        };

        Self::from_scores(average_confidence, success_rate, min_confidence, min_success_rate, error_count)
    }

    #[must_use]
    pub fn from_scores(
        average_confidence: f64,
        success_rate: f64,
        min_confidence: f64,
        min_success_rate: f64,
        error_count: usize,
    ) -> Self {
        Self {
            average_confidence,
            success_rate,
            error_count,
            min_confidence,
            meets_confidence_threshold: average_confidence >= min_confidence,
            meets_success_rate_threshold: success_rate >= min_success_rate,
            verdict: QualityVerdict::from_scores(average_confidence, success_rate),
        }
    }
}

/// Snapshot taken in MONITOR after an execution round
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    pub issues: Vec<String>,
}

impl ProgressReport {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(results: &[LinkingResult], total: usize, error_count: usize) -> Self {
        let processed = results.len();
        let mut issues = Vec::new();

        let no_candidates = results.iter().filter(|r| r.no_candidates_found()).count();
        if no_candidates > 0 {
            issues.push(format!("{no_candidates} mentions without candidates"));
        }
        let ambiguous = results.iter().filter(|r| r.is_ambiguous).count();
        if ambiguous > 0 {
            issues.push(format!("{ambiguous} ambiguous mentions"));
        }
        let invalid = results
            .iter()
            .filter(|r| r.metadata.validation.as_ref().is_some_and(|v| !v.is_valid))
            .count();
        if invalid > 0 {
            issues.push(format!("{invalid} mentions failed validation"));
        }
        if error_count > 0 {
            issues.push(format!("{error_count} processing errors"));
        }

        Self {
            processed,
            total,
            percentage: if total == 0 {
                0.0
            } else {
                processed as f64 / total as f64 * 100.0
            },
            issues,
        }
    }
}

/// Observability record assembled in FINALIZE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    /// Stage name to how many times it ran
    pub stages: BTreeMap<String, usize>,
    pub event_count: usize,
    pub verdict: QualityVerdict,
    pub reprocess_attempts: u32,
    pub warnings: Vec<String>,
}
