//! Typed contracts exchanged between the build stages.
//!
//! Every struct here is the declared output shape of one stage. Shapes
//! produced by the completion service also derive `JsonSchema` so the flow
//! runner can describe them in the request, and implement [`Validate`] for
//! the constraints that serde alone cannot express.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::Validate;

/// Free-form JSON object used for model configs and hyperparameters.
pub type JsonMap = serde_json::Map<String, Value>;

/// Machine-learning task family a goal is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TaskType {
    #[serde(rename = "NLP")]
    Nlp,
    #[serde(rename = "CV")]
    Cv,
    Audio,
    Tabular,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [TaskType::Nlp, TaskType::Cv, TaskType::Audio, TaskType::Tabular];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Nlp => "NLP",
            TaskType::Cv => "CV",
            TaskType::Audio => "Audio",
            TaskType::Tabular => "Tabular",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the classification stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// The classified machine learning task type.
    pub task_type: TaskType,
    /// A short, descriptive project name (3-5 words).
    pub project_name: String,
}

impl Validate for ClassificationResult {
    fn validate(&self) -> Result<(), String> {
        if self.project_name.trim().is_empty() {
            return Err("projectName must not be empty".to_string());
        }
        Ok(())
    }
}

/// Output of the dataset selection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatasetSelection {
    /// Where the dataset comes from: 'hf', 'kaggle', 'upload', ...
    #[serde(rename = "datasetSource", alias = "source")]
    pub source: String,
    /// Name of the dataset.
    #[serde(rename = "datasetName", alias = "name")]
    pub name: String,
    /// URL of the dataset, if it has one.
    #[serde(
        rename = "datasetUrl",
        alias = "url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<String>,
    /// Preprocessing steps such as 'normalize', 'tokenize', 'encode_labels'.
    #[serde(rename = "suggestedPreprocessing", default)]
    pub suggested_preprocessing: Vec<String>,
}

impl Validate for DatasetSelection {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("datasetName must not be empty".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("datasetSource must not be empty".to_string());
        }
        Ok(())
    }
}

/// Per-column profile produced by dataset analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(rename = "type", default)]
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub statistics: BTreeMap<String, f64>,
}

/// Output of the dataset examination stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub columns: Vec<ColumnProfile>,
    /// `[rows, columns]`.
    pub shape: [u64; 2],
    pub dtypes: BTreeMap<String, String>,
    pub statistics: BTreeMap<String, Value>,
}

impl DatasetProfile {
    /// Canned profile substituted when analysis is unavailable.
    pub fn fallback() -> Self {
        let statistics: BTreeMap<String, f64> = [
            ("mean".to_string(), 2.8),
            ("std".to_string(), 1.2),
            ("min".to_string(), 0.1),
            ("max".to_string(), 9.8),
        ]
        .into_iter()
        .collect();

        Self {
            columns: vec![ColumnProfile {
                name: "feature_1".to_string(),
                dtype: "float64".to_string(),
                sample: vec![Value::from(1.2), Value::from(3.4), Value::from(5.6)],
                statistics,
            }],
            shape: [1000, 2],
            dtypes: [
                ("feature_1".to_string(), "float64".to_string()),
                ("target".to_string(), "int64".to_string()),
            ]
            .into_iter()
            .collect(),
            statistics: [
                ("total_samples".to_string(), Value::from(1000)),
                ("total_features".to_string(), Value::from(1)),
                ("target_classes".to_string(), Value::from(2)),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl Validate for DatasetProfile {
    fn validate(&self) -> Result<(), String> {
        if self.shape[1] == 0 {
            return Err("dataset profile has zero columns".to_string());
        }
        Ok(())
    }
}

/// One step of a preprocessing plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PreprocessingStep {
    /// Step name, e.g. 'normalize', 'tokenize', 'handle_missing'.
    pub name: String,
    /// Step configuration.
    #[serde(default)]
    pub config: JsonMap,
}

/// Output of the preprocessing planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingPlan {
    /// Ordered preprocessing pipeline.
    #[serde(rename = "preprocessingSteps", alias = "steps")]
    pub steps: Vec<PreprocessingStep>,
    /// `[rows, columns]` of the dataset after preprocessing.
    pub processed_shape: [u64; 2],
}

impl Validate for PreprocessingPlan {
    fn validate(&self) -> Result<(), String> {
        if let Some(step) = self.steps.iter().find(|s| s.name.trim().is_empty()) {
            return Err(format!("preprocessing step with empty name: {:?}", step));
        }
        Ok(())
    }
}

/// Output of the model-architecture planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelPlan {
    /// Model family, e.g. 'bert', 'cnn', 'lstm', 'xgboost'.
    pub model_type: String,
    /// Model configuration parameters.
    #[serde(default)]
    pub model_config: JsonMap,
    /// Training hyperparameters such as learning_rate, batch_size, epochs.
    #[serde(default)]
    pub hyperparameters: JsonMap,
    /// 'pytorch', 'tensorflow' or 'sklearn'.
    pub framework: String,
}

/// Largest epoch count a model plan may request.
pub const MAX_EPOCHS: u32 = 10_000;

impl ModelPlan {
    /// Epoch count requested by the hyperparameters, if any.
    ///
    /// Whole-valued floats such as `10.0` count as integers.
    pub fn epochs(&self) -> Option<u32> {
        match self.hyperparameters.get("epochs")? {
            Value::Number(n) => match n.as_u64() {
                Some(e) => u32::try_from(e).ok(),
                None => n
                    .as_f64()
                    .filter(|e| e.fract() == 0.0 && *e >= 0.0 && *e <= f64::from(u32::MAX))
                    .map(|e| e as u32),
            },
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Validate for ModelPlan {
    fn validate(&self) -> Result<(), String> {
        if self.model_type.trim().is_empty() {
            return Err("modelType must not be empty".to_string());
        }
        if self.framework.trim().is_empty() {
            return Err("framework must not be empty".to_string());
        }
        if self.hyperparameters.contains_key("epochs") {
            match self.epochs() {
                Some(0) | None => {
                    return Err("hyperparameters.epochs must be a positive integer".to_string())
                }
                Some(e) if e > MAX_EPOCHS => {
                    return Err(format!(
                        "hyperparameters.epochs must be at most {}, got {}",
                        MAX_EPOCHS, e
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Metrics reported for one training epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
}

/// Live training statistics, also mirrored into the session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingStats {
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub history: Vec<EpochMetrics>,
}

impl TrainingStats {
    pub fn new(total_epochs: u32) -> Self {
        Self {
            current_epoch: 0,
            total_epochs,
            loss: 0.0,
            accuracy: 0.0,
            history: Vec::new(),
        }
    }

    /// Records an epoch report.
    ///
    /// Epochs past `total_epochs` are clamped and reports older than the
    /// current epoch are ignored, so `current_epoch` only moves forward and
    /// never exceeds the total. Returns whether the report was applied.
    pub fn record(&mut self, metrics: EpochMetrics) -> bool {
        let epoch = metrics.epoch.min(self.total_epochs);
        if epoch == 0 || epoch < self.current_epoch {
            return false;
        }
        if epoch == self.current_epoch && self.history.last().map(|m| m.epoch) == Some(epoch) {
            return false;
        }
        self.current_epoch = epoch;
        self.loss = metrics.loss;
        self.accuracy = metrics.accuracy;
        self.history.push(EpochMetrics { epoch, ..metrics });
        true
    }

    pub fn is_finished(&self) -> bool {
        self.current_epoch >= self.total_epochs
    }
}

/// Output of the training stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    pub training_stats: TrainingStats,
    pub model_path: String,
    pub logs: Vec<String>,
}

impl Validate for TrainingResult {
    fn validate(&self) -> Result<(), String> {
        if self.model_path.trim().is_empty() {
            return Err("modelPath must not be empty".to_string());
        }
        if self.training_stats.current_epoch > self.training_stats.total_epochs {
            return Err(format!(
                "currentEpoch {} exceeds totalEpochs {}",
                self.training_stats.current_epoch, self.training_stats.total_epochs
            ));
        }
        Ok(())
    }
}

/// Output of the evaluation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Always 2x2 with non-negative counts.
    pub confusion_matrix: [[u64; 2]; 2],
    pub test_logs: Vec<String>,
}

impl Validate for EvaluationResult {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1Score", self.f1_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Output of the deployment planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    /// 'api', 'serverless' or 'edge'.
    pub deployment_type: String,
    /// URL where the model will be reachable.
    pub endpoint_url: String,
    /// API key, when the endpoint needs authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// How to use the deployed model.
    pub usage_instructions: String,
    /// Sample client code calling the endpoint.
    pub sdk_code: String,
}

impl Validate for DeploymentPlan {
    fn validate(&self) -> Result<(), String> {
        if self.endpoint_url.trim().is_empty() {
            return Err("endpointUrl must not be empty".to_string());
        }
        if self.deployment_type.trim().is_empty() {
            return Err("deploymentType must not be empty".to_string());
        }
        Ok(())
    }
}

/// Diagnosis of a failed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDiagnosis {
    /// Brief explanation of the error.
    pub diagnosis: String,
    /// How to fix it.
    pub suggested_fix: String,
    /// Whether a retry after the fix is expected to succeed.
    pub retry_action: bool,
    /// Replacement configuration, if one would help.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_config: Option<JsonMap>,
}

impl Validate for ErrorDiagnosis {}
