//! Evaluator agent: measures the trained model.

use std::sync::Arc;

use super::error::{AgentError, AgentResult};
use super::types::{DatasetSelection, EvaluationResult};
use crate::backend::{EvaluationBackend, EvaluationJob};
use crate::flow::Validate;

/// Runs evaluation through an [`EvaluationBackend`].
pub struct EvaluatorAgent {
    backend: Arc<dyn EvaluationBackend>,
}

impl std::fmt::Debug for EvaluatorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorAgent").finish_non_exhaustive()
    }
}

impl EvaluatorAgent {
    pub const AGENT_NAME: &'static str = "evaluation";

    pub fn new(backend: Arc<dyn EvaluationBackend>) -> Self {
        Self { backend }
    }

    pub async fn evaluate(
        &self,
        model_path: &str,
        dataset: &DatasetSelection,
    ) -> AgentResult<EvaluationResult> {
        let job = EvaluationJob {
            model_path: model_path.to_string(),
            dataset: dataset.clone(),
        };
        let result = self.backend.evaluate(&job).await?;
        result
            .validate()
            .map_err(|message| AgentError::InvalidOutput {
                stage: Self::AGENT_NAME.to_string(),
                message,
            })?;

        tracing::info!(
            accuracy = result.accuracy,
            f1 = result.f1_score,
            "Evaluation finished"
        );
        Ok(result)
    }
}
