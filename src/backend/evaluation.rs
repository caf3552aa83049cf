//! Evaluation backends.

use async_trait::async_trait;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde_json::Value;

use super::{BackendError, EvaluationBackend, EvaluationJob, ScriptRunner};
use crate::agents::types::EvaluationResult;
use crate::backend::process::ScriptMessage;
use crate::flow::Validate;

/// Script invoked as `evaluate_model.py <model path> <dataset name>`.
pub const EVALUATION_SCRIPT: &str = "evaluate_model.py";

/// Harmonic mean of precision and recall; zero when both are zero.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn summary_logs(result: &EvaluationResult) -> [String; 2] {
    [
        format!("Test completed. Accuracy: {:.2}%", result.accuracy * 100.0),
        format!("F1 Score: {:.4}", result.f1_score),
    ]
}

/// In-process evaluation returning metrics in fixed plausible bands.
///
/// Accuracy falls in `[0.85, 0.95)`, precision in `[0.82, 0.92)` and recall in
/// `[0.83, 0.93)`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEvaluator {
    seed: Option<u64>,
}

impl SimulatedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl EvaluationBackend for SimulatedEvaluator {
    async fn evaluate(&self, job: &EvaluationJob) -> Result<EvaluationResult, BackendError> {
        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        let accuracy = 0.85 + rng.random_range(0.0..0.1);
        let precision = 0.82 + rng.random_range(0.0..0.1);
        let recall = 0.83 + rng.random_range(0.0..0.1);
        let confusion_matrix = [
            [85 + rng.random_range(0..10), 5 + rng.random_range(0..5)],
            [3 + rng.random_range(0..3), 87 + rng.random_range(0..10)],
        ];

        let mut result = EvaluationResult {
            accuracy,
            precision,
            recall,
            f1_score: f1_score(precision, recall),
            confusion_matrix,
            test_logs: vec![
                format!("Loading model from {}", job.model_path),
                "Preparing test dataset...".to_string(),
                "Running inference on test set...".to_string(),
            ],
        };
        result.test_logs.extend(summary_logs(&result));

        tracing::info!(
            model_path = %job.model_path,
            accuracy = result.accuracy,
            f1 = result.f1_score,
            "Simulated evaluation finished"
        );
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportedEvaluation {
    accuracy: f64,
    precision: f64,
    recall: f64,
    #[serde(default, alias = "f1_score")]
    f1_score: Option<f64>,
    #[serde(alias = "confusion_matrix")]
    confusion_matrix: [[u64; 2]; 2],
    #[serde(default, alias = "test_logs")]
    test_logs: Vec<String>,
}

/// Runs the evaluation script and reads its `evaluation_result` line.
#[derive(Debug, Clone)]
pub struct ScriptEvaluator {
    runner: ScriptRunner,
    script: String,
}

impl ScriptEvaluator {
    pub fn new(runner: ScriptRunner) -> Self {
        Self {
            runner,
            script: EVALUATION_SCRIPT.to_string(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }
}

#[async_trait]
impl EvaluationBackend for ScriptEvaluator {
    async fn evaluate(&self, job: &EvaluationJob) -> Result<EvaluationResult, BackendError> {
        let mut report: Option<Value> = None;
        let mut reported_error: Option<String> = None;

        let args = [job.model_path.as_str(), job.dataset.name.as_str()];
        self.runner
            .run_lines(&self.script, &args, |message| match message {
                ScriptMessage::Evaluation(value) => report = Some(value),
                ScriptMessage::Error(message) => reported_error = Some(message),
                _ => {}
            })
            .await?;

        let Some(report) = report else {
            return Err(match reported_error {
                Some(message) => BackendError::ScriptReported {
                    script: self.script.clone(),
                    message,
                },
                None => BackendError::NoResult {
                    script: self.script.clone(),
                },
            });
        };

        let reported: ReportedEvaluation = serde_json::from_value(report)
            .map_err(|e| BackendError::InvalidResult(format!("evaluation report: {}", e)))?;

        let mut result = EvaluationResult {
            accuracy: reported.accuracy,
            precision: reported.precision,
            recall: reported.recall,
            f1_score: reported
                .f1_score
                .unwrap_or_else(|| f1_score(reported.precision, reported.recall)),
            confusion_matrix: reported.confusion_matrix,
            test_logs: reported.test_logs,
        };
        if result.test_logs.is_empty() {
            result.test_logs.extend(summary_logs(&result));
        }
        result.validate().map_err(BackendError::InvalidResult)?;
        Ok(result)
    }
}
