use thiserror::Error;

use crate::supervisor::{QualityReport, SupervisorEvent, SupervisorState};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Input rejected: {}", issues.join("; "))]
    InputRejected { issues: Vec<String> },

    #[error("Quality gate failed ({}): {} processing errors", report.verdict, errors.len())]
    QualityGate {
        report: QualityReport,
        errors: Vec<String>,
    },

    #[error("Confidence must be between 0 and 1, got {0}")]
    InvalidConfidence(f64),

    #[error("Column values cannot be empty")]
    EmptyColumn,

    #[error("Column type already set to {0}")]
    ColumnTypeAlreadySet(crate::column::ColumnType),

    #[error("Invalid column type: {0}")]
    InvalidColumnType(String),

    #[error("Table context does not describe column '{0}'")]
    ContextMismatch(String),

    #[error("Invalid supervisor transition from {from} on {event:?}")]
    InvalidTransition {
        from: SupervisorState,
        event: SupervisorEvent,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Request-level failures are the only errors surfaced to the caller of a run.
    #[must_use]
    pub const fn is_request_failure(&self) -> bool {
        matches!(self, Self::InputRejected { .. } | Self::QualityGate { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
