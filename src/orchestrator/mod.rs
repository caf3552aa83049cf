//! Build orchestration.
//!
//! The control logic lives in [`state`] as a pure transition function; the
//! [`driver`] performs the agent calls and session-store writes around each
//! transition, and adds cancellation and per-stage timeouts.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pipeline_forge::config::ForgeConfig;
//! use pipeline_forge::llm::LiteLlmClient;
//! use pipeline_forge::orchestrator::{BuildOrchestrator, BuildRequest};
//! use pipeline_forge::session::InMemorySessionStore;
//!
//! let config = ForgeConfig::from_env()?;
//! let orchestrator = BuildOrchestrator::from_config(
//!     Arc::new(LiteLlmClient::from_env()?),
//!     Arc::new(InMemorySessionStore::new()),
//!     &config,
//! );
//! let outcome = orchestrator
//!     .run(BuildRequest::new("user-1", "Classify customer reviews by sentiment"))
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&outcome)?);
//! ```

pub mod driver;
pub mod error;
pub mod outcome;
pub mod state;

pub use driver::{BuildOrchestrator, BuildRequest, OrchestratorOptions, StageAgents};
pub use error::{OrchestratorError, OrchestratorResult};
pub use outcome::{BuildOutcome, FinalModel};
pub use state::{transition, BuildEvent, BuildState, TransitionError};
