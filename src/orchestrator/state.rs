//! The build state machine.
//!
//! ```text
//! Initializing --start--> Running(classify) --ok--> Running(dataset) ... Running(deployment) --ok--> Completed
//!                               |                        |                    |
//!                               +---------fail-----------+--------fail--------+------> Failed
//! ```
//!
//! [`transition`] is pure; the driver persists whatever state it returns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{CurrentStep, SessionStatus, Stage};

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BuildState {
    Initializing,
    Running { stage: Stage },
    Completed,
    Failed {
        stage: Option<Stage>,
        message: String,
    },
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Start,
    StageSucceeded,
    StageFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid transition from {from} on {event}")]
pub struct TransitionError {
    pub from: String,
    pub event: String,
}

impl BuildState {
    pub fn status(&self) -> SessionStatus {
        match self {
            BuildState::Initializing => SessionStatus::Initializing,
            BuildState::Running { .. } => SessionStatus::Running,
            BuildState::Completed => SessionStatus::Completed,
            BuildState::Failed { .. } => SessionStatus::Failed,
        }
    }

    /// The `currentStep` marker persisted for this state.
    pub fn current_step(&self) -> CurrentStep {
        match self {
            BuildState::Initializing => CurrentStep::Stage(Stage::Classify),
            BuildState::Running { stage } => CurrentStep::Stage(*stage),
            BuildState::Completed => CurrentStep::Completed,
            BuildState::Failed { .. } => CurrentStep::Error,
        }
    }

    pub fn running_stage(&self) -> Option<Stage> {
        match self {
            BuildState::Running { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    fn label(&self) -> String {
        match self {
            BuildState::Initializing => "initializing".to_string(),
            BuildState::Running { stage } => format!("running({})", stage),
            BuildState::Completed => "completed".to_string(),
            BuildState::Failed { .. } => "failed".to_string(),
        }
    }
}

/// Computes the state after `event`.
///
/// Terminal states accept no events, and stage outcomes are only meaningful
/// while a stage is running.
pub fn transition(state: &BuildState, event: &BuildEvent) -> Result<BuildState, TransitionError> {
    match (state, event) {
        (BuildState::Initializing, BuildEvent::Start) => Ok(BuildState::Running {
            stage: Stage::Classify,
        }),
        (BuildState::Initializing, BuildEvent::StageFailed { message }) => Ok(BuildState::Failed {
            stage: None,
            message: message.clone(),
        }),
        (BuildState::Running { stage }, BuildEvent::StageSucceeded) => Ok(match stage.next() {
            Some(next) => BuildState::Running { stage: next },
            None => BuildState::Completed,
        }),
        (BuildState::Running { stage }, BuildEvent::StageFailed { message }) => {
            Ok(BuildState::Failed {
                stage: Some(*stage),
                message: message.clone(),
            })
        }
        (state, event) => Err(TransitionError {
            from: state.label(),
            event: format!("{:?}", event),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_visits_every_stage_in_order() {
        let mut state = transition(&BuildState::Initializing, &BuildEvent::Start).expect("start");
        let mut visited = Vec::new();
        while let Some(stage) = state.running_stage() {
            visited.push(stage);
            state = transition(&state, &BuildEvent::StageSucceeded).expect("advance");
        }
        assert_eq!(visited, Stage::ALL.to_vec());
        assert_eq!(state, BuildState::Completed);
        assert_eq!(state.current_step(), CurrentStep::Completed);
        assert_eq!(state.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_failure_records_stage() {
        let state = BuildState::Running {
            stage: Stage::ModelBuilder,
        };
        let failed = transition(
            &state,
            &BuildEvent::StageFailed {
                message: "boom".to_string(),
            },
        )
        .expect("fail");
        assert_eq!(
            failed,
            BuildState::Failed {
                stage: Some(Stage::ModelBuilder),
                message: "boom".to_string()
            }
        );
        assert_eq!(failed.current_step(), CurrentStep::Error);
        assert!(failed.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_events() {
        for terminal in [
            BuildState::Completed,
            BuildState::Failed {
                stage: None,
                message: "x".to_string(),
            },
        ] {
            assert!(transition(&terminal, &BuildEvent::StageSucceeded).is_err());
            assert!(transition(&terminal, &BuildEvent::Start).is_err());
        }
    }

    #[test]
    fn test_cannot_restart_running_build() {
        let state = BuildState::Running {
            stage: Stage::Training,
        };
        let err = transition(&state, &BuildEvent::Start).unwrap_err();
        assert!(err.to_string().contains("running(training)"));
    }

    #[test]
    fn test_cannot_succeed_before_start() {
        assert!(transition(&BuildState::Initializing, &BuildEvent::StageSucceeded).is_err());
    }
}
