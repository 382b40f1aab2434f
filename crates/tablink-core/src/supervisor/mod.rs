mod machine;
mod orchestrator;
mod report;
mod state;

pub use machine::{transition, SupervisorEvent, SupervisorState};
pub use orchestrator::{LinkingPipeline, LinkingRequest, PipelineOutcome};
pub use report::{CompletionSummary, ProgressReport, QualityReport, QualityVerdict};
pub use state::{PipelineState, PipelineStateDelta};
