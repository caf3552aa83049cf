//! Error diagnosis agent: explains a failed stage.
//!
//! Diagnoses are advisory. They are attached to the failed session's error
//! step and never trigger a retry.

use serde::Serialize;
use serde_json::Value;

use super::error::AgentResult;
use super::types::ErrorDiagnosis;
use crate::flow::{Flow, FlowRunner};

const DIAGNOSIS_ROLE: &str = "an Error Handler Agent that debugs failed ML pipeline stages";

const DIAGNOSIS_USER_TEMPLATE: &str = r#"A stage of an ML build pipeline failed. Analyze the error and suggest a fix.

Failed stage: {{stage}}
Error: {{error}}
Context: {{context}}

Say whether retrying after the fix should succeed, and give an alternative
configuration if one would avoid the error."#;

#[derive(Debug, Serialize)]
struct DiagnosisInput {
    stage: String,
    error: String,
    context: Value,
}

/// Diagnoses stage failures.
#[derive(Debug)]
pub struct ErrorDiagnosisAgent {
    runner: FlowRunner,
    flow: Flow<DiagnosisInput, ErrorDiagnosis>,
}

impl ErrorDiagnosisAgent {
    pub const AGENT_NAME: &'static str = "error_handler_agent";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(Self::AGENT_NAME, DIAGNOSIS_ROLE, DIAGNOSIS_USER_TEMPLATE),
        }
    }

    /// Diagnoses `error` raised by `stage`; `context` is any JSON the caller
    /// has about the failure, typically the outputs gathered so far.
    pub async fn diagnose(
        &self,
        stage: &str,
        error: &str,
        context: Value,
    ) -> AgentResult<ErrorDiagnosis> {
        let input = DiagnosisInput {
            stage: stage.to_string(),
            error: error.to_string(),
            context,
        };
        Ok(self.runner.run(&self.flow, &input).await?)
    }
}
