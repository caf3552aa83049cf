//! The build-session document and its building blocks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::types::TrainingStats;

/// The eight build stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Dataset,
    ExamineDataset,
    Preprocessing,
    ModelBuilder,
    Training,
    Evaluation,
    Deployment,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Classify,
        Stage::Dataset,
        Stage::ExamineDataset,
        Stage::Preprocessing,
        Stage::ModelBuilder,
        Stage::Training,
        Stage::Evaluation,
        Stage::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Dataset => "dataset",
            Stage::ExamineDataset => "examine_dataset",
            Stage::Preprocessing => "preprocessing",
            Stage::ModelBuilder => "model_builder",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Deployment => "deployment",
        }
    }

    /// Zero-based position in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage that runs after this one, `None` after deployment.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Lifecycle status of a build session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Completed and failed sessions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(SessionStatus::Initializing),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// The `currentStep` marker: a stage name, `completed` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CurrentStep {
    Stage(Stage),
    Completed,
    Error,
}

impl CurrentStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrentStep::Stage(stage) => stage.as_str(),
            CurrentStep::Completed => "completed",
            CurrentStep::Error => "error",
        }
    }
}

impl fmt::Display for CurrentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CurrentStep> for String {
    fn from(step: CurrentStep) -> Self {
        step.as_str().to_string()
    }
}

impl TryFrom<String> for CurrentStep {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.as_str() {
            "completed" => Ok(CurrentStep::Completed),
            "error" => Ok(CurrentStep::Error),
            other => other.parse().map(CurrentStep::Stage),
        }
    }
}

/// State of one recorded step.
///
/// The orchestrator only records finished steps; `pending` and `in_progress`
/// are accepted so documents written by other clients still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Name of the pseudo-step recorded when a session fails.
pub const ERROR_STEP: &str = "error";

/// One entry of the session's ordered step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Stage name, or `error` for the failure record.
    pub step: String,
    pub status: StepStatus,
    /// The stage's typed output as JSON; `{error, stage}` for failures.
    pub result: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn completed(stage: Stage, result: Value) -> Self {
        Self {
            step: stage.as_str().to_string(),
            status: StepStatus::Completed,
            result,
            logs: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// The failure record; `stage` is the stage that failed, if any ran.
    pub fn error(message: &str, stage: Option<Stage>) -> Self {
        let mut result = serde_json::Map::new();
        result.insert("error".to_string(), Value::from(message));
        if let Some(stage) = stage {
            result.insert("stage".to_string(), Value::from(stage.as_str()));
        }
        Self {
            step: ERROR_STEP.to_string(),
            status: StepStatus::Failed,
            result: Value::Object(result),
            logs: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn is_error(&self) -> bool {
        self.step == ERROR_STEP
    }
}

/// The persisted record of one build attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSession {
    pub session_id: String,
    pub user_id: String,
    /// The goal as the user typed it.
    pub prompt: String,
    pub status: SessionStatus,
    pub current_step: CurrentStep,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_stats: Option<TrainingStats>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildSession {
    /// A fresh session about to start with the classify stage.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            status: SessionStatus::Initializing,
            current_step: CurrentStep::Stage(Stage::Classify),
            steps: Vec::new(),
            training_stats: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Document path: `users/{userId}/build-sessions/{sessionId}`.
    pub fn path(&self) -> String {
        session_path(&self.user_id, &self.session_id)
    }

    /// The failure record, if the session failed.
    pub fn error_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.is_error())
    }
}

pub fn session_path(user_id: &str, session_id: &str) -> String {
    format!("users/{}/build-sessions/{}", user_id, session_id)
}

/// A partial update; every present field overwrites the stored one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_step: Option<CurrentStep>,
    pub steps: Option<Vec<StepResult>>,
    pub training_stats: Option<TrainingStats>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_step(mut self, step: CurrentStep) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn steps(mut self, steps: Vec<StepResult>) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn training_stats(mut self, stats: TrainingStats) -> Self {
        self.training_stats = Some(stats);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &SessionUpdate::default()
    }

    /// Applies the update and bumps `updated_at`.
    pub fn apply(&self, session: &mut BuildSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(step) = self.current_step {
            session.current_step = step;
        }
        if let Some(steps) = &self.steps {
            session.steps = steps.clone();
        }
        if let Some(stats) = &self.training_stats {
            session.training_stats = Some(stats.clone());
        }
        session.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Classify.next(), Some(Stage::Dataset));
        assert_eq!(Stage::Evaluation.next(), Some(Stage::Deployment));
        assert_eq!(Stage::Deployment.next(), None);
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), i);
            assert_eq!(stage.as_str().parse::<Stage>(), Ok(*stage));
        }
    }

    #[test]
    fn test_stage_wire_names_match_as_str() {
        for stage in Stage::ALL {
            assert_eq!(serde_json::to_value(stage).expect("serialize"), json!(stage.as_str()));
        }
    }

    #[test]
    fn test_current_step_round_trips_as_plain_string() {
        assert_eq!(
            serde_json::to_value(CurrentStep::Stage(Stage::ModelBuilder)).expect("serialize"),
            json!("model_builder")
        );
        assert_eq!(
            serde_json::from_value::<CurrentStep>(json!("error")).expect("parse"),
            CurrentStep::Error
        );
        assert!(serde_json::from_value::<CurrentStep>(json!("launch")).is_err());
    }

    #[test]
    fn test_error_step_payload() {
        let step = StepResult::error("model builder exploded", Some(Stage::ModelBuilder));
        assert!(step.is_error());
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(
            step.result,
            json!({"error": "model builder exploded", "stage": "model_builder"})
        );
    }

    #[test]
    fn test_step_status_wire_names() {
        for (status, wire) in [
            (StepStatus::Pending, "pending"),
            (StepStatus::InProgress, "in_progress"),
            (StepStatus::Completed, "completed"),
            (StepStatus::Failed, "failed"),
        ] {
            assert_eq!(serde_json::to_value(status).expect("serialize"), json!(wire));
            assert_eq!(
                serde_json::from_value::<StepStatus>(json!(wire)).expect("parse"),
                status
            );
        }
    }

    #[test]
    fn test_session_with_in_progress_step_loads() {
        let session = BuildSession::new("u1", "s1", "predict churn");
        let mut doc = serde_json::to_value(&session).expect("serialize");
        doc["steps"] = json!([{
            "step": "training",
            "status": "in_progress",
            "result": {},
            "timestamp": "2026-10-18T12:00:00Z"
        }]);
        let loaded: BuildSession = serde_json::from_value(doc).expect("parse");
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].status, StepStatus::InProgress);
        assert!(!loaded.steps[0].is_error());
    }

    #[test]
    fn test_session_document_shape() {
        let session = BuildSession::new("u1", "s1", "predict churn");
        let doc = serde_json::to_value(&session).expect("serialize");
        assert_eq!(doc["status"], json!("initializing"));
        assert_eq!(doc["currentStep"], json!("classify"));
        assert!(doc.get("trainingStats").is_none());
        assert_eq!(session.path(), "users/u1/build-sessions/s1");
    }

    #[test]
    fn test_update_overwrites_fields() {
        let mut session = BuildSession::new("u1", "s1", "goal");
        let before = session.updated_at;
        let update = SessionUpdate::new()
            .status(SessionStatus::Running)
            .steps(vec![StepResult::completed(Stage::Classify, json!({}))]);
        assert!(!update.is_empty());
        update.apply(&mut session);

        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.steps.len(), 1);
        assert_eq!(session.current_step, CurrentStep::Stage(Stage::Classify));
        assert!(session.updated_at >= before);

        SessionUpdate::new().steps(Vec::new()).apply(&mut session);
        assert!(session.steps.is_empty());
    }
}
