//! Trainer agent: turns a model plan into a training job and runs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{AgentError, AgentResult};
use super::types::{DatasetSelection, ModelPlan, TrainingResult, MAX_EPOCHS};
use crate::backend::training::{model_path_for, DEFAULT_MODEL_OUTPUT_DIR};
use crate::backend::{ProgressSender, TrainingBackend, TrainingJob};
use crate::flow::Validate;

/// Epochs trained when the model plan does not say.
pub const DEFAULT_TOTAL_EPOCHS: u32 = 50;

/// Runs training through a [`TrainingBackend`].
pub struct TrainerAgent {
    backend: Arc<dyn TrainingBackend>,
    model_output_dir: PathBuf,
}

impl std::fmt::Debug for TrainerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerAgent")
            .field("model_output_dir", &self.model_output_dir)
            .finish_non_exhaustive()
    }
}

impl TrainerAgent {
    pub const AGENT_NAME: &'static str = "training";

    pub fn new(backend: Arc<dyn TrainingBackend>) -> Self {
        Self {
            backend,
            model_output_dir: PathBuf::from(DEFAULT_MODEL_OUTPUT_DIR),
        }
    }

    pub fn with_model_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_output_dir = dir.into();
        self
    }

    pub fn model_output_dir(&self) -> &Path {
        &self.model_output_dir
    }

    /// Builds the job the backend will run for `dataset` and `model`.
    pub fn job_for(&self, dataset: &DatasetSelection, model: &ModelPlan) -> TrainingJob {
        TrainingJob {
            dataset: dataset.clone(),
            model: model.clone(),
            total_epochs: model.epochs().unwrap_or(DEFAULT_TOTAL_EPOCHS).min(MAX_EPOCHS),
            model_path: model_path_for(&self.model_output_dir, &dataset.name),
        }
    }

    /// Trains the planned model, reporting applied epochs on `progress`.
    pub async fn train(
        &self,
        dataset: &DatasetSelection,
        model: &ModelPlan,
        progress: ProgressSender,
    ) -> AgentResult<TrainingResult> {
        let job = self.job_for(dataset, model);
        tracing::info!(
            dataset = %dataset.name,
            total_epochs = job.total_epochs,
            model_path = %job.model_path,
            "Starting training"
        );

        let result = self.backend.train(&job, progress).await?;
        result
            .validate()
            .map_err(|message| AgentError::InvalidOutput {
                stage: Self::AGENT_NAME.to_string(),
                message,
            })?;

        tracing::info!(
            epochs = result.training_stats.current_epoch,
            accuracy = result.training_stats.accuracy,
            loss = result.training_stats.loss,
            "Training finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::JsonMap;
    use crate::backend::SimulatedTrainer;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn dataset() -> DatasetSelection {
        DatasetSelection {
            source: "hf".to_string(),
            name: "Fashion MNIST".to_string(),
            url: None,
            suggested_preprocessing: Vec::new(),
        }
    }

    fn model(epochs: Option<u32>) -> ModelPlan {
        let mut hyperparameters = JsonMap::new();
        if let Some(epochs) = epochs {
            hyperparameters.insert("epochs".to_string(), json!(epochs));
        }
        ModelPlan {
            model_type: "cnn".to_string(),
            model_config: JsonMap::new(),
            hyperparameters,
            framework: "pytorch".to_string(),
        }
    }

    #[test]
    fn test_job_defaults_to_fifty_epochs() {
        let agent = TrainerAgent::new(Arc::new(SimulatedTrainer::new()))
            .with_model_output_dir("/srv/models");
        let job = agent.job_for(&dataset(), &model(None));
        assert_eq!(job.total_epochs, DEFAULT_TOTAL_EPOCHS);
        assert_eq!(job.model_path, "/srv/models/fashion_mnist");
    }

    #[test]
    fn test_job_caps_epochs() {
        let agent = TrainerAgent::new(Arc::new(SimulatedTrainer::new()));
        let job = agent.job_for(&dataset(), &model(Some(u32::MAX)));
        assert_eq!(job.total_epochs, MAX_EPOCHS);
    }

    #[tokio::test]
    async fn test_train_uses_planned_epochs() {
        let agent = TrainerAgent::new(Arc::new(SimulatedTrainer::new().with_seed(1)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = agent
            .train(&dataset(), &model(Some(5)), ProgressSender::every_epoch(tx))
            .await
            .expect("training");
        assert_eq!(result.training_stats.total_epochs, 5);
        assert_eq!(result.training_stats.current_epoch, 5);
        assert_eq!(result.model_path, "/tmp/trained_models/fashion_mnist");
    }
}
