//! Training backends.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use super::{BackendError, ProgressSender, ScriptRunner, TrainingBackend, TrainingJob};
use crate::agents::types::{EpochMetrics, TrainingResult, TrainingStats, MAX_EPOCHS};
use crate::backend::process::ScriptMessage;
use crate::error::ProcessError;

/// Script invoked as `train_model.py <dataset name> <dataset source>`.
pub const TRAINING_SCRIPT: &str = "train_model.py";

/// Where trained models go unless configured otherwise.
pub const DEFAULT_MODEL_OUTPUT_DIR: &str = "/tmp/trained_models";

/// Model location for a dataset: spaces become underscores, lowercased.
pub fn model_path_for(output_dir: &Path, dataset_name: &str) -> String {
    output_dir
        .join(dataset_name.replace(' ', "_").to_lowercase())
        .to_string_lossy()
        .into_owned()
}

fn epoch_log_line(stats: &TrainingStats) -> String {
    format!(
        "Epoch {}/{} - Loss: {:.4}, Accuracy: {:.4}",
        stats.current_epoch, stats.total_epochs, stats.loss, stats.accuracy
    )
}

/// Applies one epoch report and offers the new snapshot to `progress`.
fn apply_epoch(
    stats: &mut TrainingStats,
    metrics: EpochMetrics,
    progress: &mut ProgressSender,
    logs: &mut Vec<String>,
) {
    if stats.record(metrics) {
        logs.push(epoch_log_line(stats));
        if progress.report(stats) {
            debug!(epoch = stats.current_epoch, "Sent training progress");
        }
    }
}

/// In-process training that draws plausible, improving curves.
///
/// Loss falls roughly 0.01 per epoch from 0.5 (floored at 0.01) and accuracy
/// rises from 0.5 (capped at 0.95), each with a little noise.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTrainer {
    seed: Option<u64>,
    epoch_delay: Duration,
}

impl SimulatedTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes runs reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Pauses between epochs so progress can be watched live.
    pub fn with_epoch_delay(mut self, delay: Duration) -> Self {
        self.epoch_delay = delay;
        self
    }
}

#[async_trait]
impl TrainingBackend for SimulatedTrainer {
    async fn train(
        &self,
        job: &TrainingJob,
        mut progress: ProgressSender,
    ) -> Result<TrainingResult, BackendError> {
        let mut rng = match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let mut stats = TrainingStats::new(job.total_epochs);
        let mut logs = Vec::with_capacity(job.total_epochs.min(MAX_EPOCHS) as usize + 1);

        info!(
            dataset = %job.dataset.name,
            model_type = %job.model.model_type,
            total_epochs = job.total_epochs,
            "Starting simulated training"
        );

        for epoch in 1..=job.total_epochs {
            let step = f64::from(epoch) * 0.01;
            let metrics = EpochMetrics {
                epoch,
                loss: (0.5 - step + rng.random_range(-0.05..0.05)).max(0.01),
                accuracy: (0.5 + step + rng.random_range(-0.02..0.02)).min(0.95),
            };
            apply_epoch(&mut stats, metrics, &mut progress, &mut logs);

            // Every epoch is an await point, so timeouts and cancellation
            // racing this future get polled.
            if self.epoch_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.epoch_delay).await;
            }
        }

        logs.push("Training completed successfully".to_string());
        Ok(TrainingResult {
            training_stats: stats,
            model_path: job.model_path.clone(),
            logs,
        })
    }
}

/// Runs the training script and relays its epoch reports.
#[derive(Debug, Clone)]
pub struct ScriptTrainer {
    runner: ScriptRunner,
    script: String,
}

impl ScriptTrainer {
    pub fn new(runner: ScriptRunner) -> Self {
        Self {
            runner,
            script: TRAINING_SCRIPT.to_string(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }
}

#[async_trait]
impl TrainingBackend for ScriptTrainer {
    async fn train(
        &self,
        job: &TrainingJob,
        mut progress: ProgressSender,
    ) -> Result<TrainingResult, BackendError> {
        let mut stats = TrainingStats::new(job.total_epochs);
        let mut logs = Vec::new();
        let mut reported_path: Option<String> = None;
        let mut reported_error: Option<String> = None;

        let args = [job.dataset.name.as_str(), job.dataset.source.as_str()];
        let run = self
            .runner
            .run_lines(&self.script, &args, |message| match message {
                ScriptMessage::TrainingUpdate(metrics) => {
                    apply_epoch(&mut stats, metrics, &mut progress, &mut logs)
                }
                ScriptMessage::TrainingComplete { model_path, .. } => reported_path = model_path,
                ScriptMessage::Error(message) => reported_error = Some(message),
                _ => {}
            })
            .await;

        if let Err(e) = run {
            if let ProcessError::NonZeroExit { code, .. } = &e {
                warn!(script = %self.script, code, "Training failed with exit code {}", code);
            }
            return Err(e.into());
        }
        if let Some(message) = reported_error {
            return Err(BackendError::ScriptReported {
                script: self.script.clone(),
                message,
            });
        }

        let model_path = reported_path.unwrap_or_else(|| {
            warn!(script = %self.script, "Training script reported no model path");
            job.model_path.clone()
        });
        logs.push("Training completed successfully".to_string());

        Ok(TrainingResult {
            training_stats: stats,
            model_path,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{DatasetSelection, JsonMap, ModelPlan};
    use crate::backend::process::tests::shell_script;
    use tokio::sync::mpsc;

    fn job(total_epochs: u32) -> TrainingJob {
        TrainingJob {
            dataset: DatasetSelection {
                source: "kaggle".to_string(),
                name: "Credit Card Fraud".to_string(),
                url: None,
                suggested_preprocessing: Vec::new(),
            },
            model: ModelPlan {
                model_type: "xgboost".to_string(),
                model_config: JsonMap::new(),
                hyperparameters: JsonMap::new(),
                framework: "sklearn".to_string(),
            },
            total_epochs,
            model_path: model_path_for(Path::new(DEFAULT_MODEL_OUTPUT_DIR), "Credit Card Fraud"),
        }
    }

    #[test]
    fn test_model_path_for() {
        assert_eq!(
            model_path_for(Path::new("/tmp/trained_models"), "Credit Card Fraud"),
            "/tmp/trained_models/credit_card_fraud"
        );
    }

    #[tokio::test]
    async fn test_simulated_training_curves_stay_in_bounds() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = SimulatedTrainer::new()
            .with_seed(7)
            .train(&job(50), ProgressSender::every_epoch(tx))
            .await
            .expect("training");

        let stats = &result.training_stats;
        assert_eq!(stats.current_epoch, 50);
        assert_eq!(stats.history.len(), 50);
        for m in &stats.history {
            assert!(m.loss >= 0.01);
            assert!(m.accuracy <= 0.95);
        }
        assert_eq!(result.logs.len(), 51);
        assert_eq!(result.logs.last().map(String::as_str), Some("Training completed successfully"));
        assert!(result.logs[0].starts_with("Epoch 1/50 - Loss: "));
        assert_eq!(result.model_path, "/tmp/trained_models/credit_card_fraud");

        let mut snapshots = 0;
        while rx.try_recv().is_ok() {
            snapshots += 1;
        }
        assert_eq!(snapshots, 50);
    }

    #[tokio::test]
    async fn test_simulated_training_is_reproducible_with_seed() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let trainer = SimulatedTrainer::new().with_seed(42);
        let a = trainer.train(&job(10), ProgressSender::every_epoch(tx_a)).await.expect("training");
        let b = trainer.train(&job(10), ProgressSender::every_epoch(tx_b)).await.expect("training");
        assert_eq!(a.training_stats, b.training_stats);
    }

    #[tokio::test]
    async fn test_simulated_training_without_listener() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = SimulatedTrainer::new().train(&job(3), ProgressSender::every_epoch(tx)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_simulated_training_throttles_before_sending() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        SimulatedTrainer::new()
            .with_seed(5)
            .train(&job(2000), ProgressSender::new(tx, 500))
            .await
            .expect("training");

        let mut epochs = Vec::new();
        while let Ok(stats) = rx.try_recv() {
            epochs.push(stats.current_epoch);
        }
        assert_eq!(epochs, vec![1, 501, 1001, 1501, 2000]);
    }

    #[tokio::test]
    async fn test_simulated_training_can_be_timed_out() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let trainer = SimulatedTrainer::new();
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(1),
            trainer.train(&job(u32::MAX), ProgressSender::new(tx, 1000)),
        )
        .await;
        assert!(outcome.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_script_training_clamps_epochs() {
        let (_dir, runner) = shell_script(
            TRAINING_SCRIPT,
            r#"for e in 1 2 3 4; do
  echo "{\"type\":\"training_update\",\"epoch\":$e,\"loss\":0.3,\"accuracy\":0.8}"
done
echo '{"status":"completed","model_path":"/models/fraud","final_accuracy":0.8,"final_loss":0.3}'
"#,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = ScriptTrainer::new(runner)
            .train(&job(2), ProgressSender::every_epoch(tx))
            .await
            .expect("training");

        assert_eq!(result.training_stats.current_epoch, 2);
        assert_eq!(result.training_stats.total_epochs, 2);
        assert_eq!(result.model_path, "/models/fraud");
    }

    #[tokio::test]
    async fn test_script_training_failure() {
        let (_dir, runner) = shell_script(TRAINING_SCRIPT, "echo 'CUDA out of memory' >&2\nexit 1\n");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = ScriptTrainer::new(runner).train(&job(5), ProgressSender::every_epoch(tx)).await.unwrap_err();
        assert!(err.to_string().contains("exited with code 1"));
    }
}
