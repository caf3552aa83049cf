//! Prompt-flow wrapper.
//!
//! A [`Flow`] pairs a typed input with a typed output shape and a prompt
//! template. The [`FlowRunner`] renders the template from the input, asks the
//! completion service for a JSON reply, and turns that reply into the output
//! type, so no stage agent ever handles raw completion text.

pub mod runner;
pub mod template;

use std::marker::PhantomData;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use runner::{FlowOptions, FlowRunner};
pub use template::{PromptTemplate, TemplateError};

/// Constraints on a flow output that its type cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A named prompt flow from `I` to `O`.
pub struct Flow<I, O> {
    name: &'static str,
    role: &'static str,
    template: PromptTemplate,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Flow<I, O>
where
    I: Serialize,
    O: DeserializeOwned + JsonSchema + Validate,
{
    /// Creates a flow.
    ///
    /// `role` is the one-line description of the expert the model should act
    /// as; `template` is rendered from the serialized input.
    pub fn new(name: &'static str, role: &'static str, template: impl Into<String>) -> Self {
        Self {
            name,
            role,
            template: PromptTemplate::new(template),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }
}

impl<I, O> std::fmt::Debug for Flow<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
