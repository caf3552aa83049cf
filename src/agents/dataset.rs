//! Dataset agent: proposes a dataset for the classified goal.

use serde::Serialize;

use super::error::AgentResult;
use super::types::{DatasetSelection, TaskType};
use crate::flow::{Flow, FlowRunner};

const DATASET_ROLE: &str = "a Dataset Agent that picks public training data for ML projects";

const DATASET_USER_TEMPLATE: &str = r#"Suggest one appropriate dataset for this project.

Project goal: "{{prompt}}"
Task type: {{taskType}}

Prefer well-known public datasets (Hugging Face "hf", Kaggle "kaggle"). Include
the dataset URL when one exists, and list the preprocessing steps the data
will likely need (e.g. "normalize", "tokenize", "encode_labels")."#;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetInput {
    prompt: String,
    task_type: TaskType,
}

/// Selects a dataset for a classified goal.
#[derive(Debug)]
pub struct DatasetAgent {
    runner: FlowRunner,
    flow: Flow<DatasetInput, DatasetSelection>,
}

impl DatasetAgent {
    pub const AGENT_NAME: &'static str = "dataset_agent";

    pub fn new(runner: FlowRunner) -> Self {
        Self {
            runner,
            flow: Flow::new(Self::AGENT_NAME, DATASET_ROLE, DATASET_USER_TEMPLATE),
        }
    }

    pub async fn select(&self, prompt: &str, task_type: TaskType) -> AgentResult<DatasetSelection> {
        let input = DatasetInput {
            prompt: prompt.to_string(),
            task_type,
        };
        let selection = self.runner.run(&self.flow, &input).await?;
        tracing::info!(
            dataset = %selection.name,
            source = %selection.source,
            "Selected dataset"
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::runner_replying;

    #[tokio::test]
    async fn test_select_dataset() {
        let (runner, mock) = runner_replying(
            r#"{"datasetSource":"hf","datasetName":"imdb","datasetUrl":"https://huggingface.co/datasets/imdb","suggestedPreprocessing":["tokenize","lowercase"]}"#,
        );
        let selection = DatasetAgent::new(runner)
            .select("movie review sentiment", TaskType::Nlp)
            .await
            .expect("selection");

        assert_eq!(selection.name, "imdb");
        assert_eq!(selection.source, "hf");
        assert_eq!(selection.suggested_preprocessing.len(), 2);

        let prompt = mock.last_user_prompt().expect("prompt");
        assert!(prompt.contains("Task type: NLP"));
    }

    #[tokio::test]
    async fn test_select_dataset_without_url() {
        let (runner, _mock) = runner_replying(
            r#"{"datasetSource":"kaggle","datasetName":"titanic","suggestedPreprocessing":[]}"#,
        );
        let selection = DatasetAgent::new(runner)
            .select("predict survivors", TaskType::Tabular)
            .await
            .expect("selection");
        assert!(selection.url.is_none());
    }
}
