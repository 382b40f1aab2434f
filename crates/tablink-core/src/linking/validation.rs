use crate::result::{LinkingResult, ValidationOutcome};

pub const NO_SELECTION_REASON: &str = "no candidate selected";
pub const HIGH_CONFIDENCE_REASON: &str = "High confidence match";
pub const LOW_CONFIDENCE_REASON: &str = "Low confidence match";

/// Confidence-threshold validation of a single linking result.
#[derive(Debug, Clone, Copy)]
pub struct ResultValidator {
    threshold: f64,
}

impl ResultValidator {
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Judges a result without touching it.
    #[must_use]
    pub fn validate(&self, result: &LinkingResult) -> ValidationOutcome {
        if result.selected_candidate.is_none() {
            return ValidationOutcome {
                is_valid: false,
                score: 0.0,
                reasons: vec![NO_SELECTION_REASON.to_string()],
                suggestions: vec!["Consider relaxing matching criteria".to_string()],
            };
        }

        let is_valid = result.confidence > self.threshold;
        let mut reasons = vec![if is_valid {
            HIGH_CONFIDENCE_REASON.to_string()
        } else {
            LOW_CONFIDENCE_REASON.to_string()
        }];
        let mut suggestions = Vec::new();

        if result.is_ambiguous {
            reasons.push("Several candidates remain plausible".to_string());
        }
        if !is_valid || result.is_ambiguous {
            suggestions.push("Consider manual verification".to_string());
        }

        ValidationOutcome {
            is_valid,
            score: result.confidence,
            reasons,
            suggestions,
        }
    }
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new(0.6)
    }
}
