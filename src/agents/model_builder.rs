//! Model builder agent: picks an architecture and hyperparameters.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::AgentResult;
use super::types::{DatasetProfile, ModelPlan, PreprocessingPlan, TaskType};
use crate::flow::{Flow, FlowRunner};

const MODEL_BUILDER_ROLE: &str = "a Model Builder Agent that designs ML model architectures";

const MODEL_BUILDER_USER_TEMPLATE: &str = r#"Suggest the best model architecture for this task.

Task type: {{taskType}}
Processed dataset shape: {{shape}}
Column types: {{dtypes}}
Preprocessing steps: {{preprocessingSteps}}

Give the model type, its configuration, the training hyperparameters
(include "epochs", "learning_rate" and "batch_size") and the framework:
"pytorch", "tensorflow" or "sklearn"."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelBuilderInput {
    task_type: TaskType,
    shape: [u64; 2],
    dtypes: BTreeMap<String, String>,
    preprocessing_steps: Vec<String>,
}

/// Chooses the model to train.
#[derive(Debug)]
pub struct ModelBuilderAgent {
    runner: FlowRunner,
    flow: Flow<ModelBuilderInput, ModelPlan>,
}

impl ModelBuilderAgent {
    pub const AGENT_NAME: &'static str = "model_builder_agent";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(
                Self::AGENT_NAME,
                MODEL_BUILDER_ROLE,
                MODEL_BUILDER_USER_TEMPLATE,
            ),
        }
    }

    pub async fn plan(
        &self,
        task_type: TaskType,
        profile: &DatasetProfile,
        preprocessing: &PreprocessingPlan,
    ) -> AgentResult<ModelPlan> {
        let input = ModelBuilderInput {
            task_type,
            shape: preprocessing.processed_shape,
            dtypes: profile.dtypes.clone(),
            preprocessing_steps: preprocessing.steps.iter().map(|s| s.name.clone()).collect(),
        };
        let plan = self.runner.run(&self.flow, &input).await?;
        tracing::info!(
            model_type = %plan.model_type,
            framework = %plan.framework,
            epochs = ?plan.epochs(),
            "Planned model"
        );
        Ok(plan)
    }
}
