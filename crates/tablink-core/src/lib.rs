pub mod candidate;
pub mod column;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod generation;
pub mod linking;
pub mod result;
pub mod store;
pub mod supervisor;

pub use candidate::{EntityCandidate, EntityType, ScoreBreakdown};
pub use column::{ColumnStatistics, ColumnType, ContextSource, Domain, TableColumn, TableContext};
pub use config::{GenerationConfig, LinkingConfig, RetryPolicy};
pub use error::{Error, Result};
pub use events::{EventKind, EventSink, FanoutSink, MemoryEventSink, PipelineEvent, TracingEventSink};
pub use gateway::{
    load_descriptors, GatewayError, GatewayKind, GatewayRegistry, KnowledgeBaseDescriptor,
    KnowledgeBaseGateway,
};
pub use generation::{GenerationError, HttpTextGenerator, TextGenerationService};
pub use result::{ColumnLinkingResult, LinkingResult, ResultMetadata, ResultNote, ValidationOutcome};
pub use store::{PhaseSink, RequestRecord, RequestStatus, RequestStore};
pub use supervisor::{
    LinkingPipeline, LinkingRequest, PipelineOutcome, QualityReport, QualityVerdict, SupervisorState,
};
