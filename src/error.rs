//! Error types for pipeline-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Completion-service (LLM) interactions
//! - Prompt-flow rendering, parsing and output validation
//! - Session document persistence
//! - External analysis/training processes

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors raised by the prompt-flow wrapper.
///
/// The completion-service failures are kept apart from the reply-validation
/// failures: an empty reply, a reply with no JSON in it, a reply whose JSON
/// does not deserialize into the declared output shape, and a reply that
/// deserializes but violates the shape's constraints are all distinct.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow '{flow}': template error: {message}")]
    Template { flow: String, message: String },

    #[error("Flow '{flow}': completion service call failed: {source}")]
    Completion {
        flow: String,
        #[source]
        source: LlmError,
    },

    #[error("Flow '{flow}': the completion service returned no output")]
    EmptyCompletion { flow: String },

    #[error("Flow '{flow}': no JSON object found in completion. Content starts with: '{preview}'")]
    NoJson { flow: String, preview: String },

    #[error("Flow '{flow}': completion does not match the output shape: {message}")]
    SchemaMismatch { flow: String, message: String },

    #[error("Flow '{flow}': output failed validation: {message}")]
    Invalid { flow: String, message: String },

    #[error("Flow '{flow}': input could not be serialized: {source}")]
    Input {
        flow: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FlowError {
    /// Name of the flow that raised the error.
    pub fn flow(&self) -> &str {
        match self {
            FlowError::Template { flow, .. }
            | FlowError::Completion { flow, .. }
            | FlowError::EmptyCompletion { flow }
            | FlowError::NoJson { flow, .. }
            | FlowError::SchemaMismatch { flow, .. }
            | FlowError::Invalid { flow, .. }
            | FlowError::Input { flow, .. } => flow,
        }
    }

    /// True when the completion service answered but the reply was unusable.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            FlowError::EmptyCompletion { .. }
                | FlowError::NoJson { .. }
                | FlowError::SchemaMismatch { .. }
                | FlowError::Invalid { .. }
        )
    }
}

/// Errors that can occur while reading or writing session documents.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session '{session_id}' not found for user '{user_id}'")]
    NotFound { user_id: String, session_id: String },

    #[error("Session '{session_id}' already exists for user '{user_id}'")]
    AlreadyExists { user_id: String, session_id: String },

    #[error("Invalid session document: {0}")]
    InvalidData(String),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while running an external analysis or training process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Process '{program}' exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Process '{program}' produced no result")]
    NoResult { program: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failures_are_grouped() {
        let empty = FlowError::EmptyCompletion {
            flow: "classify".to_string(),
        };
        let mismatch = FlowError::SchemaMismatch {
            flow: "classify".to_string(),
            message: "missing field `taskType`".to_string(),
        };
        let completion = FlowError::Completion {
            flow: "classify".to_string(),
            source: LlmError::RequestFailed("connection refused".to_string()),
        };

        assert!(empty.is_validation_failure());
        assert!(mismatch.is_validation_failure());
        assert!(!completion.is_validation_failure());
        assert_eq!(completion.flow(), "classify");
    }

    #[test]
    fn test_error_messages_are_distinct() {
        let empty = FlowError::EmptyCompletion {
            flow: "dataset".to_string(),
        };
        let mismatch = FlowError::SchemaMismatch {
            flow: "dataset".to_string(),
            message: "bad".to_string(),
        };
        assert_ne!(empty.to_string(), mismatch.to_string());
        assert!(empty.to_string().contains("no output"));
    }
}
