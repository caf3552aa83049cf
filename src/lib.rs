//! pipeline-forge: staged LLM agents that turn a plain-language goal into an
//! ML pipeline.
//!
//! A build session runs eight stages in order (classify, dataset,
//! examine_dataset, preprocessing, model_builder, training, evaluation,
//! deployment) and records every step in a session document that a UI can
//! follow live.

pub mod agents;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod flow;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use config::{ConfigError, ForgeConfig};
pub use error::{FlowError, LlmError, ProcessError, StoreError};
pub use orchestrator::{BuildOrchestrator, BuildOutcome, BuildRequest, OrchestratorError};
pub use session::{BuildSession, SessionStatus, SessionStore, Stage};
