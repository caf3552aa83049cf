//! What a finished build returns to its caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::types::{DeploymentPlan, EvaluationResult, ModelPlan};
use crate::session::{SessionStatus, Stage};

/// Descriptor of the trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalModel {
    /// Project name from classification.
    pub name: String,
    pub path: String,
    pub metrics: EvaluationResult,
    pub config: ModelPlan,
}

/// Aggregated result of one build session.
///
/// A failed session still returns an outcome: `status` is `failed`, `error`
/// holds the recorded message and `pipeline` the outputs gathered before the
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    /// Stage outputs keyed by stage name.
    pub pipeline: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_model: Option<FinalModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Output of `stage`, if it ran to completion.
    pub fn stage_output(&self, stage: Stage) -> Option<&Value> {
        self.pipeline.get(stage.as_str())
    }
}
