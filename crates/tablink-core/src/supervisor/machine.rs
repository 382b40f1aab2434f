use serde::{Deserialize, Serialize};

use super::report::QualityVerdict;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorState {
    Init,
    ValidateInput,
    Plan,
    Execute,
    Monitor,
    QualityCheck,
    Finalize,
    Rejected,
    Failed,
}

impl SupervisorState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::ValidateInput => "VALIDATE_INPUT",
            Self::Plan => "PLAN",
            Self::Execute => "EXECUTE",
            Self::Monitor => "MONITOR",
            Self::QualityCheck => "QUALITY_CHECK",
            Self::Finalize => "FINALIZE",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalize | Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the stage that just ran reports back to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Started,
    InputAccepted,
    InputRejected,
    Planned,
    Executed,
    Monitored,
    QualityAssessed {
        verdict: QualityVerdict,
        /// Whether another planning round is still allowed
        reprocess_available: bool,
    },
}

/// The supervisor's transition function. Anything not listed is an error.
pub fn transition(state: SupervisorState, event: SupervisorEvent) -> Result<SupervisorState> {
    use SupervisorEvent as E;
    use SupervisorState as S;

    let next = match (state, event) {
        (S::Init, E::Started) => S::ValidateInput,
        (S::ValidateInput, E::InputAccepted) => S::Plan,
        (S::ValidateInput, E::InputRejected) => S::Rejected,
        (S::Plan, E::Planned) => S::Execute,
        (S::Execute, E::Executed) => S::Monitor,
        (S::Monitor, E::Monitored) => S::QualityCheck,
        (S::QualityCheck, E::QualityAssessed { verdict, reprocess_available }) => match verdict {
            QualityVerdict::High => S::Finalize,
            QualityVerdict::Medium if reprocess_available => S::Plan,
            QualityVerdict::Medium => S::Finalize,
            QualityVerdict::Low => S::Failed,
        },
        (from, event) => return Err(Error::InvalidTransition { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessed(verdict: QualityVerdict, reprocess_available: bool) -> SupervisorEvent {
        SupervisorEvent::QualityAssessed {
            verdict,
            reprocess_available,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut state = SupervisorState::Init;
        for event in [
            SupervisorEvent::Started,
            SupervisorEvent::InputAccepted,
            SupervisorEvent::Planned,
            SupervisorEvent::Executed,
            SupervisorEvent::Monitored,
            assessed(QualityVerdict::High, true),
        ] {
            state = transition(state, event).unwrap();
        }
        assert_eq!(state, SupervisorState::Finalize);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rejection() {
        let state = transition(SupervisorState::ValidateInput, SupervisorEvent::InputRejected).unwrap();
        assert_eq!(state, SupervisorState::Rejected);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_quality_verdicts() {
        let qc = SupervisorState::QualityCheck;
        assert_eq!(transition(qc, assessed(QualityVerdict::Low, true)).unwrap(), SupervisorState::Failed);
        assert_eq!(
            transition(qc, assessed(QualityVerdict::Medium, false)).unwrap(),
            SupervisorState::Finalize
        );
    }

    #[test]
    fn test_medium_reprocesses_only_when_allowed() {
        let qc = SupervisorState::QualityCheck;
        assert_eq!(
            transition(qc, assessed(QualityVerdict::Medium, true)).unwrap(),
            SupervisorState::Plan
        );
        assert_eq!(
            transition(qc, assessed(QualityVerdict::High, true)).unwrap(),
            SupervisorState::Finalize
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(matches!(
            transition(SupervisorState::Init, SupervisorEvent::Planned),
            Err(Error::InvalidTransition { from: SupervisorState::Init, .. })
        ));
        for terminal in [SupervisorState::Finalize, SupervisorState::Rejected, SupervisorState::Failed] {
            assert!(transition(terminal, SupervisorEvent::Started).is_err());
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SupervisorState::QualityCheck.to_string(), "QUALITY_CHECK");
        assert_eq!(
            serde_json::to_value(SupervisorState::ValidateInput).unwrap(),
            "VALIDATE_INPUT"
        );
    }
}
