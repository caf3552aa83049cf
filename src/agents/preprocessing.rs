//! Preprocessing agent: plans the data preparation pipeline.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use super::error::AgentResult;
use super::types::{DatasetProfile, DatasetSelection, PreprocessingPlan, TaskType};
use crate::flow::{Flow, FlowRunner};

const PREPROCESSING_ROLE: &str = "a Preprocessing Agent that designs data preparation pipelines";

const PREPROCESSING_USER_TEMPLATE: &str = r#"Define the preprocessing pipeline for this dataset.

Task type: {{taskType}}
Dataset: {{datasetName}} (source: {{datasetSource}})
Shape: {{shape}}
Column types: {{dtypes}}
Statistics: {{statistics}}
Suggested steps: {{suggestedPreprocessing}}

List the steps in the order they should run, each with its configuration,
and give the [rows, columns] shape of the dataset after preprocessing."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreprocessingInput {
    task_type: TaskType,
    dataset_name: String,
    dataset_source: String,
    shape: [u64; 2],
    dtypes: BTreeMap<String, String>,
    statistics: BTreeMap<String, Value>,
    suggested_preprocessing: Vec<String>,
}

/// Plans preprocessing for an examined dataset.
#[derive(Debug)]
pub struct PreprocessingAgent {
    runner: FlowRunner,
    flow: Flow<PreprocessingInput, PreprocessingPlan>,
}

impl PreprocessingAgent {
    pub const AGENT_NAME: &'static str = "preprocessing_agent";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(
                Self::AGENT_NAME,
                PREPROCESSING_ROLE,
                PREPROCESSING_USER_TEMPLATE,
            ),
        }
    }

    pub async fn plan(
        &self,
        task_type: TaskType,
        dataset: &DatasetSelection,
        profile: &DatasetProfile,
    ) -> AgentResult<PreprocessingPlan> {
        let input = PreprocessingInput {
            task_type,
            dataset_name: dataset.name.clone(),
            dataset_source: dataset.source.clone(),
            shape: profile.shape,
            dtypes: profile.dtypes.clone(),
            statistics: profile.statistics.clone(),
            suggested_preprocessing: dataset.suggested_preprocessing.clone(),
        };
        let plan = self.runner.run(&self.flow, &input).await?;
        tracing::info!(
            steps = plan.steps.len(),
            processed_shape = ?plan.processed_shape,
            "Planned preprocessing"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::runner_replying;

    fn dataset() -> DatasetSelection {
        DatasetSelection {
            source: "kaggle".to_string(),
            name: "titanic".to_string(),
            url: None,
            suggested_preprocessing: vec!["handle_missing".to_string()],
        }
    }

    #[tokio::test]
    async fn test_plan_preprocessing() {
        let (runner, mock) = runner_replying(
            r#"{"preprocessingSteps":[{"name":"handle_missing","config":{"strategy":"median"}},{"name":"normalize","config":{}}],"processedShape":[891,10]}"#,
        );
        let plan = PreprocessingAgent::new(runner)
            .plan(TaskType::Tabular, &dataset(), &DatasetProfile::fallback())
            .await
            .expect("plan");

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].name, "handle_missing");
        assert_eq!(plan.processed_shape, [891, 10]);

        let prompt = mock.last_user_prompt().expect("prompt");
        assert!(prompt.contains("Shape: [1000,2]"));
        assert!(prompt.contains("Suggested steps: [\"handle_missing\"]"));
    }

    #[tokio::test]
    async fn test_plan_rejects_bad_shape() {
        let (runner, _mock) = runner_replying(
            r#"{"preprocessingSteps":[],"processedShape":[891]}"#,
        );
        let result = PreprocessingAgent::new(runner)
            .plan(TaskType::Tabular, &dataset(), &DatasetProfile::fallback())
            .await;
        assert!(result.is_err());
    }
}
