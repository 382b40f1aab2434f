use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A type label attached to a candidate by its knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl EntityType {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The signals that produced a candidate's confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub similarity: f64,
    pub type_compatibility: f64,
    pub ed_score: f64,
    pub popularity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_confidence: Option<f64>,
    pub total: f64,
}

/// A knowledge-base entity proposed as the referent of a mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub types: Vec<EntityType>,
    /// Lexical similarity between mention and name as reported by the source
    #[serde(default)]
    pub ed_score: f64,
    #[serde(default)]
    pub popularity: f64,
    pub source_kb: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub kb_data: serde_json::Value,
}

impl EntityCandidate {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, source_kb: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            types: Vec::new(),
            ed_score: 0.0,
            popularity: 0.0,
            source_kb: source_kb.into(),
            confidence: 0.0,
            breakdown: None,
            reasoning: None,
            kb_data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, entity_type: EntityType) -> Self {
        self.types.push(entity_type);
        self
    }

    #[must_use]
    pub fn with_scores(mut self, ed_score: f64, popularity: f64) -> Self {
        self.ed_score = ed_score.clamp(0.0, 1.0);
        self.popularity = popularity.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_kb_data(mut self, data: serde_json::Value) -> Self {
        self.kb_data = data;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self> {
        self.set_confidence(confidence)?;
        Ok(self)
    }

    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Rejects anything outside `[0, 1]`, including NaN.
    pub fn set_confidence(&mut self, confidence: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidConfidence(confidence));
        }
        self.confidence = confidence;
        Ok(())
    }

    /// For scores computed in-crate; clamps instead of failing.
    pub(crate) fn force_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    /// Re-checks the confidence invariant, e.g. after deserialization.
    pub fn validate(&self) -> Result<()> {
        if (0.0..=1.0).contains(&self.confidence) {
            Ok(())
        } else {
            Err(Error::InvalidConfidence(self.confidence))
        }
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }
}
