//! Completion-service integration.
//!
//! Every stage agent reaches the hosted model through the [`LlmProvider`]
//! trait, so the orchestrator can be driven by the HTTP client in production
//! and by stub providers in tests.
//!
//! ```ignore
//! use pipeline_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]).with_json_output();
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
