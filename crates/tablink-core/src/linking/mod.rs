mod classifier;
mod disambiguation;
mod metrics;
mod planner;
mod retrieval;
mod validation;

pub use classifier::{infer_domain, ColumnClassifier, ValuePattern};
pub use disambiguation::{
    name_similarity, score_breakdown, type_compatibility, DisambiguationScorer,
};
pub use metrics::{aggregate, ProcessingMetrics};
pub use planner::{
    expected_coverage, score_gateway, ComplexityTier, ExecutionPlan, GatewaySelection,
    KnowledgeBasePlanner, OptimizationMode, ProcessingStrategy,
};
pub use retrieval::{aggregate_candidates, MentionRetrieval, RetrievalFanout};
pub use validation::{ResultValidator, NO_SELECTION_REASON};
