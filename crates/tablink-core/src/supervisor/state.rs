use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::report::{ProgressReport, QualityReport};
use crate::candidate::EntityCandidate;
use crate::column::{ColumnType, TableColumn, TableContext};
use crate::error::Result;
use crate::linking::ExecutionPlan;
use crate::result::LinkingResult;

/// Working record of one pipeline run.
///
/// Owned by exactly one run. Stages read it and hand back a
/// [`PipelineStateDelta`]; only the orchestrator applies deltas.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub request_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub column: TableColumn,
    /// Context exactly as the caller sent it
    pub provided_context: Option<TableContext>,
    pub context: Option<TableContext>,
    pub plan: Option<ExecutionPlan>,
    pub candidates: HashMap<String, Vec<EntityCandidate>>,
    pub results: Vec<LinkingResult>,
    pub confidence: HashMap<String, f64>,
    pub progress: Option<ProgressReport>,
    pub quality: Option<QualityReport>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub reprocess_attempts: u32,
    /// Collaborator-specific data, merged by key
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl PipelineState {
    #[must_use]
    pub fn new(request_id: Uuid, column: TableColumn, provided_context: Option<TableContext>) -> Self {
        Self {
            request_id,
            started_at: Utc::now(),
            column,
            provided_context,
            context: None,
            plan: None,
            candidates: HashMap::new(),
            results: Vec::new(),
            confidence: HashMap::new(),
            progress: None,
            quality: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            reprocess_attempts: 0,
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        self.column.column_type()
    }

    /// Merges a stage's output. Lists of errors and warnings append,
    /// extensions union by key, every other present field replaces.
    pub fn apply(&mut self, delta: PipelineStateDelta) -> Result<()> {
        if let Some(column_type) = delta.column_type {
            self.column.set_column_type(column_type)?;
        }
        if let Some(context) = delta.context {
            self.context = Some(context);
        }
        if let Some(plan) = delta.plan {
            self.plan = Some(plan);
        }
        if let Some(candidates) = delta.candidates {
            self.candidates = candidates;
        }
        if let Some(results) = delta.results {
            self.results = results;
        }
        if let Some(confidence) = delta.confidence {
            self.confidence = confidence;
        }
        if let Some(progress) = delta.progress {
            self.progress = Some(progress);
        }
        if let Some(quality) = delta.quality {
            self.quality = Some(quality);
        }
        if let Some(attempts) = delta.reprocess_attempts {
            self.reprocess_attempts = attempts;
        }
        self.errors.extend(delta.errors);
        self.warnings.extend(delta.warnings);
        self.extensions.extend(delta.extensions);
        Ok(())
    }
}

/// Field updates produced by one stage
#[derive(Debug, Clone, Default)]
pub struct PipelineStateDelta {
    pub column_type: Option<ColumnType>,
    pub context: Option<TableContext>,
    pub plan: Option<ExecutionPlan>,
    pub candidates: Option<HashMap<String, Vec<EntityCandidate>>>,
    pub results: Option<Vec<LinkingResult>>,
    pub confidence: Option<HashMap<String, f64>>,
    pub progress: Option<ProgressReport>,
    pub quality: Option<QualityReport>,
    pub reprocess_attempts: Option<u32>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl PipelineStateDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn state() -> PipelineState {
        let column = TableColumn::new("city", vec!["Paris".into()]).unwrap();
        PipelineState::new(Uuid::new_v4(), column, None)
    }

    #[test]
    fn test_errors_append_and_extensions_union() {
        let mut state = state();

        state
            .apply(
                PipelineStateDelta::new()
                    .with_error("first")
                    .with_extension("a", serde_json::json!(1))
                    .with_extension("b", serde_json::json!(1)),
            )
            .unwrap();
        state
            .apply(
                PipelineStateDelta::new()
                    .with_error("second")
                    .with_extension("b", serde_json::json!(2)),
            )
            .unwrap();

        assert_eq!(state.errors, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(state.extensions["a"], 1);
        assert_eq!(state.extensions["b"], 2);
    }

    #[test]
    fn test_present_fields_replace() {
        let mut state = state();
        state
            .apply(PipelineStateDelta {
                results: Some(vec![LinkingResult::no_candidates("Paris")]),
                ..PipelineStateDelta::default()
            })
            .unwrap();
        state
            .apply(PipelineStateDelta {
                results: Some(Vec::new()),
                ..PipelineStateDelta::default()
            })
            .unwrap();
        assert!(state.results.is_empty());

        // absent fields leave the state alone
        state.apply(PipelineStateDelta::new().with_error("x")).unwrap();
        assert!(state.results.is_empty());
        assert!(state.plan.is_none());
    }

    #[test]
    fn test_column_type_set_once() {
        let mut state = state();
        let classify = || PipelineStateDelta {
            column_type: Some(ColumnType::Location),
            ..PipelineStateDelta::default()
        };

        state.apply(classify()).unwrap();
        assert_eq!(state.column_type(), ColumnType::Location);
        assert!(matches!(
            state.apply(classify()),
            Err(Error::ColumnTypeAlreadySet(ColumnType::Location))
        ));
    }
}
