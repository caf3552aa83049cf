//! Error types for the build orchestrator.

use std::time::Duration;

use thiserror::Error;

use super::state::TransitionError;
use crate::agents::AgentError;
use crate::error::StoreError;
use crate::session::Stage;

/// Errors that end a build session or keep it from starting.
///
/// Stage-level variants (`StageFailed`, `Cancelled`, `StageTimeout`) are
/// recorded in the session document; `Store` and `Transition` abort the
/// driver itself.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Reading or writing the session document failed.
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// The driver attempted a transition the state machine forbids.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A stage agent raised an error.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: AgentError,
    },

    /// The session was cancelled while `stage` was pending or running.
    #[error("cancelled")]
    Cancelled { stage: Option<Stage> },

    /// A stage exceeded the configured per-stage timeout.
    #[error("Stage '{stage}' timed out after {} seconds", .timeout.as_secs_f64())]
    StageTimeout { stage: Stage, timeout: Duration },

    /// A session with this id is already being driven by this orchestrator.
    #[error("Session '{0}' is already running")]
    AlreadyRunning(String),
}

impl OrchestratorError {
    /// The stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestratorError::StageFailed { stage, .. }
            | OrchestratorError::StageTimeout { stage, .. } => Some(*stage),
            OrchestratorError::Cancelled { stage } => *stage,
            _ => None,
        }
    }

    /// Whether this error ends the session rather than the driver.
    pub fn is_stage_outcome(&self) -> bool {
        matches!(
            self,
            OrchestratorError::StageFailed { .. }
                | OrchestratorError::Cancelled { .. }
                | OrchestratorError::StageTimeout { .. }
        )
    }
}

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
