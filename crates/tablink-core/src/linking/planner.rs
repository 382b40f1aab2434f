use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::column::{ColumnType, Domain};
use crate::gateway::{GatewayKind, KnowledgeBaseDescriptor};
use crate::result::duration_ms;

const SELECTION_THRESHOLD: f64 = 0.3;
const FALLBACK_COUNT: usize = 2;
const SECONDS_PER_VALUE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    #[must_use]
    pub const fn from_workload(data_size: usize, has_context: bool) -> Self {
        if data_size > 100 {
            Self::High
        } else if data_size > 20 || has_context {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Largest batch that tier allows
    #[must_use]
    pub const fn batch_limit(&self) -> usize {
        match self {
            Self::Low => 20,
            Self::Medium => 10,
            Self::High => 5,
        }
    }

    #[must_use]
    pub const fn duration_multiplier(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 1.5,
            Self::High => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    Speed,
    /// Neither the speed nor the quality threshold applies
    Balanced,
    Quality,
}

impl OptimizationMode {
    #[must_use]
    pub const fn for_data_size(data_size: usize) -> Self {
        if data_size > 50 {
            Self::Speed
        } else if data_size <= 10 {
            Self::Quality
        } else {
            Self::Balanced
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStrategy {
    pub batch_size: usize,
    /// Reported only. Retrieval inside a batch is always concurrent.
    pub parallel: bool,
    pub mode: OptimizationMode,
    pub complexity: ComplexityTier,
}

impl ProcessingStrategy {
    #[must_use]
    pub fn for_workload(data_size: usize, has_context: bool) -> Self {
        let complexity = ComplexityTier::from_workload(data_size, has_context);
        Self {
            batch_size: complexity.batch_limit().min(data_size).max(1),
            parallel: data_size > 20,
            mode: OptimizationMode::for_data_size(data_size),
            complexity,
        }
    }
}

/// One gateway chosen for a run, with its planning score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySelection {
    pub name: String,
    pub kind: GatewayKind,
    pub score: f64,
    pub expected_coverage: f64,
    pub priority: u32,
}

/// The planner's decision for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub column_type: ColumnType,
    pub domain: Domain,
    pub data_size: usize,
    /// Gateways over the threshold, best first
    pub selections: Vec<GatewaySelection>,
    /// Names in the order they are queried
    pub query_order: Vec<String>,
    /// Score of every enabled gateway, selected or not
    pub gateway_scores: BTreeMap<String, f64>,
    pub strategy: ProcessingStrategy,
    #[serde(with = "duration_ms")]
    pub estimated_duration: Duration,
    /// Set when the plan was produced for a reprocess attempt
    #[serde(default)]
    pub reprocess: bool,
}

impl ExecutionPlan {
    #[must_use]
    pub fn primary(&self) -> Option<&GatewaySelection> {
        self.selections.first()
    }

    #[must_use]
    pub fn fallbacks(&self) -> &[GatewaySelection] {
        let end = self.selections.len().min(1 + FALLBACK_COUNT);
        self.selections.get(1..end).unwrap_or_default()
    }
}

/// Expected share of mentions a gateway resolves for a column type.
#[must_use]
pub const fn expected_coverage(kind: GatewayKind, column_type: ColumnType) -> f64 {
    match (kind, column_type) {
        (GatewayKind::LamApi, ColumnType::Person) => 0.8,
        (GatewayKind::LamApi, ColumnType::Work) => 0.9,
        (GatewayKind::LamApi, ColumnType::Organization) => 0.7,
        (GatewayKind::GeoNames, ColumnType::Location) => 0.95,
        (GatewayKind::Sparql, ColumnType::Person) => 0.6,
        (GatewayKind::Alligator, ColumnType::Person) => 0.7,
        _ => 0.5,
    }
}

/// Scores one gateway for a column. The result never exceeds 1.0.
#[must_use]
pub fn score_gateway(
    descriptor: &KnowledgeBaseDescriptor,
    column_type: ColumnType,
    domain: Domain,
    prefer_speed: bool,
) -> f64 {
    let mut score = 0.0;

    if descriptor.supports(column_type) {
        score += 0.4;
    }

    let domain_match = matches!(
        (domain, descriptor.kind),
        (Domain::Geography, GatewayKind::GeoNames)
            | (Domain::Science | Domain::Entertainment, GatewayKind::LamApi)
    );
    if domain_match {
        score += 0.2;
    } else if descriptor.kind.is_general() {
        score += 0.1;
    }

    if prefer_speed && descriptor.kind.is_fast() {
        score += 0.1;
    }

    score += f64::from(5_u32.saturating_sub(descriptor.priority)) * 0.04;

    score.min(1.0)
}

/// Picks and orders gateways and the batching strategy for a column.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeBasePlanner;

impl KnowledgeBasePlanner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Gateways scoring above the threshold, sorted by score then priority.
    #[must_use]
    pub fn select_gateways<'a>(
        &self,
        descriptors: impl IntoIterator<Item = &'a KnowledgeBaseDescriptor>,
        column_type: ColumnType,
        domain: Domain,
        data_size: usize,
    ) -> Vec<GatewaySelection> {
        let prefer_speed = OptimizationMode::for_data_size(data_size) == OptimizationMode::Speed;
        let mut selected: Vec<GatewaySelection> = descriptors
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| GatewaySelection {
                name: d.name.clone(),
                kind: d.kind,
                score: score_gateway(d, column_type, domain, prefer_speed),
                expected_coverage: expected_coverage(d.kind, column_type),
                priority: d.priority,
            })
            .filter(|s| s.score > SELECTION_THRESHOLD)
            .collect();

        sort_selections(&mut selected);
        selected
    }

    #[must_use]
    pub fn plan(
        &self,
        descriptors: &[&KnowledgeBaseDescriptor],
        column_type: ColumnType,
        domain: Domain,
        data_size: usize,
        has_context: bool,
    ) -> ExecutionPlan {
        let prefer_speed = OptimizationMode::for_data_size(data_size) == OptimizationMode::Speed;
        let gateway_scores = descriptors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| (d.name.clone(), score_gateway(d, column_type, domain, prefer_speed)))
            .collect();

        let selections = self.select_gateways(descriptors.iter().copied(), column_type, domain, data_size);
        let query_order = selections
            .iter()
            .take(1 + FALLBACK_COUNT)
            .map(|s| s.name.clone())
            .collect();

        let strategy = ProcessingStrategy::for_workload(data_size, has_context);
        let plan = ExecutionPlan {
            id: Uuid::now_v7(),
            column_type,
            domain,
            data_size,
            selections,
            query_order,
            gateway_scores,
            strategy,
            estimated_duration: estimate_duration(data_size, strategy.complexity),
            reprocess: false,
        };

        tracing::info!(
            "Planned {} {} values over [{}] (batch {}, {:?})",
            data_size,
            column_type,
            plan.query_order.join(", "),
            strategy.batch_size,
            strategy.mode
        );
        plan
    }

    /// A follow-up plan after a medium verdict: every supporting gateway,
    /// quality mode and half-size batches.
    #[must_use]
    pub fn replan(
        &self,
        previous: &ExecutionPlan,
        descriptors: &[&KnowledgeBaseDescriptor],
    ) -> ExecutionPlan {
        let mut selections: Vec<GatewaySelection> = descriptors
            .iter()
            .filter(|d| d.enabled && d.supports(previous.column_type))
            .map(|d| GatewaySelection {
                name: d.name.clone(),
                kind: d.kind,
                score: previous
                    .gateway_scores
                    .get(&d.name)
                    .copied()
                    .unwrap_or_else(|| score_gateway(d, previous.column_type, previous.domain, false)),
                expected_coverage: expected_coverage(d.kind, previous.column_type),
                priority: d.priority,
            })
            .collect();
        sort_selections(&mut selections);

        let strategy = ProcessingStrategy {
            batch_size: (previous.strategy.batch_size / 2).max(1),
            mode: OptimizationMode::Quality,
            ..previous.strategy
        };

        tracing::info!(
            "Reprocessing {} values with {} gateways",
            previous.data_size,
            selections.len()
        );

        ExecutionPlan {
            id: Uuid::now_v7(),
            query_order: selections.iter().map(|s| s.name.clone()).collect(),
            selections,
            strategy,
            estimated_duration: estimate_duration(previous.data_size, strategy.complexity),
            reprocess: true,
            ..previous.clone()
        }
    }
}

fn sort_selections(selections: &mut [GatewaySelection]) {
    selections.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.priority.cmp(&b.priority))
    });
}

#[allow(clippy::cast_precision_loss)]
fn estimate_duration(data_size: usize, complexity: ComplexityTier) -> Duration {
    Duration::from_secs_f64(data_size as f64 * SECONDS_PER_VALUE * complexity.duration_multiplier())
}
