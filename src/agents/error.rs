//! Error types for the stage agents.

use thiserror::Error;

use crate::backend::BackendError;
use crate::error::FlowError;

/// Errors that can occur while a stage agent runs.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A prompt flow failed or returned an unusable reply.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// An analysis, training or evaluation backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Dataset analysis failed and the fallback policy forbids substitution.
    #[error("Dataset analysis unavailable for '{dataset}': {reason}")]
    AnalysisUnavailable { dataset: String, reason: String },

    /// A backend produced an output that violates its contract.
    #[error("Stage '{stage}' produced an invalid result: {message}")]
    InvalidOutput { stage: String, message: String },

    /// An upstream stage output the agent needs is missing.
    #[error("Stage '{stage}' is missing its input '{input}'")]
    MissingInput { stage: String, input: String },

    /// Progress channel closed unexpectedly.
    #[error("Channel communication failed: {0}")]
    ChannelError(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AgentError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AgentError::ChannelError(format!("Failed to send on channel: {}", err))
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
