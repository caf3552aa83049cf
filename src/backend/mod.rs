//! Pluggable backends for the work the language model cannot do.
//!
//! Dataset analysis, training and evaluation each sit behind a trait with two
//! implementations: an in-process one ([`CannedAnalyzer`],
//! [`SimulatedTrainer`], [`SimulatedEvaluator`]) and one that drives an
//! external script over the JSON-lines protocol in [`process`].

pub mod analysis;
pub mod evaluation;
pub mod process;
pub mod training;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agents::types::{
    DatasetProfile, DatasetSelection, EvaluationResult, ModelPlan, TrainingResult, TrainingStats,
};
use crate::error::ProcessError;
use crate::session::ProgressThrottle;

pub use analysis::{CannedAnalyzer, ScriptAnalyzer};
pub use evaluation::{ScriptEvaluator, SimulatedEvaluator};
pub use process::{ScriptMessage, ScriptRunner};
pub use training::{ScriptTrainer, SimulatedTrainer};

/// Errors raised by analysis, training and evaluation backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Process(#[from] ProcessError),

    #[error("Script '{script}' reported an error: {message}")]
    ScriptReported { script: String, message: String },

    #[error("Script '{script}' finished without a result")]
    NoResult { script: String },

    #[error("Backend returned an invalid result: {0}")]
    InvalidResult(String),
}

/// Relays live training statistics to whoever persists them.
///
/// Snapshots are filtered through a [`ProgressThrottle`] before they are
/// cloned, so at most one snapshot per `every_epochs` epochs (plus the first
/// and last) is ever queued.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<TrainingStats>,
    throttle: ProgressThrottle,
}

impl ProgressSender {
    pub fn new(tx: mpsc::UnboundedSender<TrainingStats>, every_epochs: u32) -> Self {
        Self {
            tx,
            throttle: ProgressThrottle::new(every_epochs),
        }
    }

    /// Forwards every applied epoch.
    pub fn every_epoch(tx: mpsc::UnboundedSender<TrainingStats>) -> Self {
        Self::new(tx, 1)
    }

    /// Sends `stats` if the throttle lets it through. Returns whether it was sent.
    ///
    /// A closed receiver only means nobody is watching progress anymore.
    pub fn report(&mut self, stats: &TrainingStats) -> bool {
        if !self.throttle.should_write(stats) {
            return false;
        }
        self.tx.send(stats.clone()).is_ok()
    }
}

/// Everything a training backend needs to train one model.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingJob {
    pub dataset: DatasetSelection,
    pub model: ModelPlan,
    pub total_epochs: u32,
    /// Where the trained model should be written.
    pub model_path: String,
}

/// Everything an evaluation backend needs to test one model.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationJob {
    pub model_path: String,
    pub dataset: DatasetSelection,
}

/// Produces a statistical profile of a dataset.
#[async_trait]
pub trait DatasetAnalyzer: Send + Sync {
    async fn analyze(&self, dataset: &DatasetSelection) -> Result<DatasetProfile, BackendError>;
}

/// Trains a model and reports per-epoch progress.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    async fn train(
        &self,
        job: &TrainingJob,
        progress: ProgressSender,
    ) -> Result<TrainingResult, BackendError>;
}

/// Measures a trained model on held-out data.
#[async_trait]
pub trait EvaluationBackend: Send + Sync {
    async fn evaluate(&self, job: &EvaluationJob) -> Result<EvaluationResult, BackendError>;
}
