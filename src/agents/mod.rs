//! Stage agents for the build pipeline.
//!
//! Each agent owns one stage of a build session:
//!
//! - **Classifier**: goal → task type and project name
//! - **Dataset**: proposes a dataset for the task
//! - **Examiner**: profiles the dataset, with a fallback policy
//! - **Preprocessing**: plans data preparation
//! - **Model builder**: picks architecture and hyperparameters
//! - **Trainer**: trains the model and streams per-epoch progress
//! - **Evaluator**: measures the trained model
//! - **Deployment**: plans how the model is served
//!
//! The language-model agents go through the [`crate::flow`] wrapper; the
//! examiner, trainer and evaluator delegate to [`crate::backend`]
//! implementations. [`ErrorDiagnosisAgent`] is not a stage: the orchestrator
//! may call it once after a stage fails.

pub mod classifier;
pub mod dataset;
pub mod deployment;
pub mod error;
pub mod error_diagnosis;
pub mod evaluator;
pub mod examiner;
pub mod model_builder;
pub mod preprocessing;
pub mod trainer;
pub mod types;

pub use classifier::ClassifierAgent;
pub use dataset::DatasetAgent;
pub use deployment::DeploymentAgent;
pub use error::{AgentError, AgentResult};
pub use error_diagnosis::ErrorDiagnosisAgent;
pub use evaluator::EvaluatorAgent;
pub use examiner::{AnalysisFallback, DatasetExaminer, Examination};
pub use model_builder::ModelBuilderAgent;
pub use preprocessing::PreprocessingAgent;
pub use trainer::{TrainerAgent, DEFAULT_TOTAL_EPOCHS};
pub use types::{
    ClassificationResult, ColumnProfile, DatasetProfile, DatasetSelection, DeploymentPlan,
    EpochMetrics, ErrorDiagnosis, EvaluationResult, ModelPlan, PreprocessingPlan,
    PreprocessingStep, TaskType, TrainingResult, TrainingStats, MAX_EPOCHS,
};


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::Serialize;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::test_support::runner_replying;
    use super::*;
    use crate::backend::{CannedAnalyzer, ProgressSender, SimulatedEvaluator, SimulatedTrainer};

    const CLASSIFY_REPLY: &str = r#"{"taskType":"NLP","projectName":"Review Sentiment"}"#;
    const DATASET_REPLY: &str = r#"{"datasetSource":"hf","datasetName":"imdb","suggestedPreprocessing":["tokenize"]}"#;
    const PREPROCESSING_REPLY: &str =
        r#"{"preprocessingSteps":[{"name":"tokenize","config":{"max_length":256}}],"processedShape":[25000,2]}"#;
    const MODEL_REPLY: &str = r#"{"modelType":"distilbert","modelConfig":{"num_labels":2},"hyperparameters":{"epochs":4.0},"framework":"pytorch"}"#;
    const DEPLOYMENT_REPLY: &str = r#"{"deploymentType":"api","endpointUrl":"https://api.example.com/v1/predict","usageInstructions":"POST JSON","sdkCode":"curl -X POST ..."}"#;

    fn dataset() -> DatasetSelection {
        DatasetSelection {
            source: "hf".to_string(),
            name: "imdb".to_string(),
            url: None,
            suggested_preprocessing: vec!["tokenize".to_string()],
        }
    }

    fn model_plan() -> ModelPlan {
        let mut hyperparameters = types::JsonMap::new();
        hyperparameters.insert("epochs".to_string(), json!(4));
        ModelPlan {
            model_type: "distilbert".to_string(),
            model_config: types::JsonMap::new(),
            hyperparameters,
            framework: "pytorch".to_string(),
        }
    }

    fn evaluation() -> EvaluationResult {
        EvaluationResult {
            accuracy: 0.5,
            precision: 0.75,
            recall: 0.25,
            f1_score: 0.375,
            confusion_matrix: [[10, 2], [3, 9]],
            test_logs: vec!["Accuracy: 0.5".to_string()],
        }
    }

    fn training() -> TrainingResult {
        let mut stats = TrainingStats::new(2);
        stats.record(EpochMetrics {
            epoch: 1,
            loss: 0.5,
            accuracy: 0.5,
        });
        stats.record(EpochMetrics {
            epoch: 2,
            loss: 0.25,
            accuracy: 0.75,
        });
        TrainingResult {
            training_stats: stats,
            model_path: "/tmp/trained_models/imdb".to_string(),
            logs: vec!["Training completed successfully".to_string()],
        }
    }

    fn assert_round_trips<T>(value: &T)
    where
        T: Serialize + serde::de::DeserializeOwned + crate::flow::Validate + PartialEq + std::fmt::Debug,
    {
        let text = serde_json::to_string(value).expect("serialize");
        let parsed: T = serde_json::from_str(&text).expect("parse");
        assert!(parsed.validate().is_ok(), "{} failed validation", text);
        assert_eq!(&parsed, value);
    }

    #[test]
    fn test_stage_outputs_round_trip_and_validate() {
        assert_round_trips(&ClassificationResult {
            task_type: TaskType::Tabular,
            project_name: "Churn Predictor".to_string(),
        });
        assert_round_trips(&dataset());
        assert_round_trips(&DatasetProfile::fallback());
        assert_round_trips(&PreprocessingPlan {
            steps: vec![PreprocessingStep {
                name: "normalize".to_string(),
                config: types::JsonMap::new(),
            }],
            processed_shape: [1000, 2],
        });
        assert_round_trips(&model_plan());
        assert_round_trips(&training());
        assert_round_trips(&evaluation());
        assert_round_trips(&DeploymentPlan {
            deployment_type: "serverless".to_string(),
            endpoint_url: "https://fn.example.com/predict".to_string(),
            api_key: Some("key-123".to_string()),
            usage_instructions: "POST JSON".to_string(),
            sdk_code: "fetch(url)".to_string(),
        });
    }

    async fn twice<T, F, Fut>(mut call: F) -> (String, String)
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AgentResult<T>>,
    {
        let first = serde_json::to_string(&call().await.expect("first call")).expect("serialize");
        let second = serde_json::to_string(&call().await.expect("second call")).expect("serialize");
        (first, second)
    }

    #[tokio::test]
    async fn test_flow_agents_are_deterministic_for_the_same_reply() {
        let (runner, _) = runner_replying(CLASSIFY_REPLY);
        let agent = ClassifierAgent::new(runner);
        let (a, b) = twice(|| agent.classify("Classify movie reviews by sentiment")).await;
        assert_eq!(a, b);

        let (runner, _) = runner_replying(DATASET_REPLY);
        let agent = DatasetAgent::new(runner);
        let (a, b) = twice(|| agent.select("Classify movie reviews", TaskType::Nlp)).await;
        assert_eq!(a, b);

        let profile = DatasetProfile::fallback();
        let (runner, _) = runner_replying(PREPROCESSING_REPLY);
        let agent = PreprocessingAgent::new(runner);
        let selection = dataset();
        let (a, b) = twice(|| agent.plan(TaskType::Nlp, &selection, &profile)).await;
        assert_eq!(a, b);

        let plan: PreprocessingPlan = serde_json::from_str(PREPROCESSING_REPLY).expect("parse");
        let (runner, _) = runner_replying(MODEL_REPLY);
        let agent = ModelBuilderAgent::new(runner);
        let (a, b) = twice(|| agent.plan(TaskType::Nlp, &profile, &plan)).await;
        assert_eq!(a, b);

        let metrics = evaluation();
        let (runner, _) = runner_replying(DEPLOYMENT_REPLY);
        let agent = DeploymentAgent::new(runner);
        let (a, b) = twice(|| agent.plan("Review Sentiment", TaskType::Nlp, "/tmp/m", &metrics)).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_backend_agents_are_deterministic_with_a_seed() {
        let examiner = DatasetExaminer::new(Arc::new(CannedAnalyzer), AnalysisFallback::Fail);
        let selection = dataset();
        let first = examiner.examine(&selection).await.expect("examine");
        let second = examiner.examine(&selection).await.expect("examine");
        assert_eq!(
            serde_json::to_string(&first.profile).expect("serialize"),
            serde_json::to_string(&second.profile).expect("serialize")
        );

        let trainer = TrainerAgent::new(Arc::new(SimulatedTrainer::new().with_seed(3)));
        let plan = model_plan();
        let (a, b) = twice(|| {
            let (tx, _rx) = mpsc::unbounded_channel();
            trainer.train(&selection, &plan, ProgressSender::every_epoch(tx))
        })
        .await;
        assert_eq!(a, b);

        let evaluator = EvaluatorAgent::new(Arc::new(SimulatedEvaluator::new().with_seed(3)));
        let (a, b) = twice(|| evaluator.evaluate("/tmp/trained_models/imdb", &selection)).await;
        assert_eq!(a, b);
    }
}
