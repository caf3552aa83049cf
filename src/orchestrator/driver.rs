//! The build driver.
//!
//! [`BuildOrchestrator::run`] walks the pure [`transition`] function from
//! `initializing` to a terminal state. Around every transition it does the
//! I/O: invoke the stage agent (raced against cancellation and the per-stage
//! timeout), then write `status`, `currentStep` and `steps` to the session
//! store in one update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{OrchestratorError, OrchestratorResult};
use super::outcome::{BuildOutcome, FinalModel};
use super::state::{transition, BuildEvent, BuildState};
use crate::agents::types::{
    ClassificationResult, DatasetProfile, DatasetSelection, DeploymentPlan, ErrorDiagnosis,
    EvaluationResult, ModelPlan, PreprocessingPlan, TrainingResult, TrainingStats,
};
use crate::agents::{
    AgentError, AgentResult, ClassifierAgent, DatasetAgent, DatasetExaminer, DeploymentAgent,
    ErrorDiagnosisAgent, EvaluatorAgent, Examination, ModelBuilderAgent, PreprocessingAgent,
    TrainerAgent,
};
use crate::backend::{
    CannedAnalyzer, DatasetAnalyzer, EvaluationBackend, ProgressSender, ScriptAnalyzer,
    ScriptEvaluator, ScriptRunner, ScriptTrainer, SimulatedEvaluator, SimulatedTrainer,
    TrainingBackend,
};
use crate::config::{AnalysisMode, BackendMode, ForgeConfig};
use crate::flow::FlowRunner;
use crate::llm::LlmProvider;
use crate::metrics::MetricsCollector;
use crate::session::{BuildSession, SessionStore, SessionUpdate, Stage, StepResult};

/// A request to build one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub user_id: String,
    pub session_id: String,
    /// The goal in the user's own words.
    pub prompt: String,
}

impl BuildRequest {
    /// A request with a freshly generated session id.
    pub fn new(user_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Execution limits for the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOptions {
    /// Upper bound on a single stage.
    pub stage_timeout: Duration,
    /// Training progress is written at most once per this many epochs.
    pub progress_every_epochs: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(600),
            progress_every_epochs: 5,
        }
    }
}

impl OrchestratorOptions {
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_progress_every_epochs(mut self, epochs: u32) -> Self {
        self.progress_every_epochs = epochs;
        self
    }
}

impl From<&ForgeConfig> for OrchestratorOptions {
    fn from(config: &ForgeConfig) -> Self {
        Self {
            stage_timeout: config.stage_timeout,
            progress_every_epochs: config.progress_every_epochs,
        }
    }
}

/// One agent per stage, plus the optional failure diagnoser.
pub struct StageAgents {
    pub classifier: ClassifierAgent,
    pub dataset: DatasetAgent,
    pub examiner: DatasetExaminer,
    pub preprocessing: PreprocessingAgent,
    pub model_builder: ModelBuilderAgent,
    pub trainer: TrainerAgent,
    pub evaluator: EvaluatorAgent,
    pub deployment: DeploymentAgent,
    /// Consulted once after a stage fails; never triggers a retry.
    pub diagnoser: Option<ErrorDiagnosisAgent>,
}

impl std::fmt::Debug for StageAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageAgents")
            .field("examiner", &self.examiner)
            .field("trainer", &self.trainer)
            .field("diagnoser", &self.diagnoser.is_some())
            .finish_non_exhaustive()
    }
}

impl StageAgents {
    /// Wires every agent to `llm_client` and the backends `config` selects.
    pub fn from_config(llm_client: Arc<dyn LlmProvider>, config: &ForgeConfig) -> Self {
        let runner = FlowRunner::new(llm_client, config.flow_options());
        let scripts = ScriptRunner::new(config.python.clone(), config.scripts_dir.clone());

        let analyzer: Arc<dyn DatasetAnalyzer> = match config.analysis_mode {
            AnalysisMode::Canned => Arc::new(CannedAnalyzer),
            AnalysisMode::Script => Arc::new(ScriptAnalyzer::new(scripts.clone())),
        };

        let training: Arc<dyn TrainingBackend> = match config.training_mode {
            BackendMode::Simulate => {
                let mut trainer =
                    SimulatedTrainer::new().with_epoch_delay(config.simulated_epoch_delay);
                if let Some(seed) = config.simulation_seed {
                    trainer = trainer.with_seed(seed);
                }
                Arc::new(trainer)
            }
            BackendMode::Script => Arc::new(ScriptTrainer::new(scripts.clone())),
        };

        let evaluation: Arc<dyn EvaluationBackend> = match config.evaluation_mode {
            BackendMode::Simulate => {
                let mut evaluator = SimulatedEvaluator::new();
                if let Some(seed) = config.simulation_seed {
                    evaluator = evaluator.with_seed(seed);
                }
                Arc::new(evaluator)
            }
            BackendMode::Script => Arc::new(ScriptEvaluator::new(scripts)),
        };

        Self {
            classifier: ClassifierAgent::new(runner.clone()),
            dataset: DatasetAgent::new(runner.clone()),
            examiner: DatasetExaminer::new(analyzer, config.on_analysis_unavailable),
            preprocessing: PreprocessingAgent::new(runner.clone()),
            model_builder: ModelBuilderAgent::new(runner.clone()),
            trainer: TrainerAgent::new(training).with_model_output_dir(config.model_output_dir.clone()),
            evaluator: EvaluatorAgent::new(evaluation),
            deployment: DeploymentAgent::new(runner.clone()),
            diagnoser: config
                .diagnose_failures
                .then(|| ErrorDiagnosisAgent::new(runner)),
        }
    }
}

/// Typed output of one stage, before it is folded into the context.
enum StageOutput {
    Classification(ClassificationResult),
    Dataset(DatasetSelection),
    Examination(Examination),
    Preprocessing(PreprocessingPlan),
    Model(ModelPlan),
    Training(TrainingResult),
    Evaluation(EvaluationResult),
    Deployment(DeploymentPlan),
}

/// What a completed stage contributes to the session document.
struct StepRecord {
    result: Value,
    logs: Vec<String>,
    training_stats: Option<TrainingStats>,
}

/// Outputs accumulated so far; each stage reads what it needs from here.
#[derive(Debug, Default)]
struct BuildContext {
    classification: Option<ClassificationResult>,
    dataset: Option<DatasetSelection>,
    profile: Option<DatasetProfile>,
    preprocessing: Option<PreprocessingPlan>,
    model: Option<ModelPlan>,
    training: Option<TrainingResult>,
    evaluation: Option<EvaluationResult>,
    deployment: Option<DeploymentPlan>,
    pipeline: Map<String, Value>,
}

fn require<'a, T>(value: &'a Option<T>, stage: Stage, input: &str) -> AgentResult<&'a T> {
    value.as_ref().ok_or_else(|| AgentError::MissingInput {
        stage: stage.to_string(),
        input: input.to_string(),
    })
}

impl BuildContext {
    /// Stores `output` and returns the record for the step log.
    fn absorb(&mut self, stage: Stage, output: StageOutput) -> Result<StepRecord, serde_json::Error> {
        let mut logs = Vec::new();
        let mut training_stats = None;

        let result = match output {
            StageOutput::Classification(out) => store(&mut self.classification, out)?,
            StageOutput::Dataset(out) => store(&mut self.dataset, out)?,
            StageOutput::Examination(examination) => {
                if let Some(reason) = examination.substitution {
                    logs.push(format!(
                        "Dataset analysis unavailable ({}); substituted the fallback profile",
                        reason
                    ));
                }
                store(&mut self.profile, examination.profile)?
            }
            StageOutput::Preprocessing(out) => store(&mut self.preprocessing, out)?,
            StageOutput::Model(out) => store(&mut self.model, out)?,
            StageOutput::Training(out) => {
                logs = out.logs.clone();
                training_stats = Some(out.training_stats.clone());
                store(&mut self.training, out)?
            }
            StageOutput::Evaluation(out) => {
                logs = out.test_logs.clone();
                store(&mut self.evaluation, out)?
            }
            StageOutput::Deployment(out) => store(&mut self.deployment, out)?,
        };

        self.pipeline.insert(stage.as_str().to_string(), result.clone());
        Ok(StepRecord {
            result,
            logs,
            training_stats,
        })
    }

    fn to_json(&self) -> Value {
        Value::Object(self.pipeline.clone())
    }

    fn final_model(&self) -> Option<FinalModel> {
        let classification = self.classification.as_ref()?;
        let training = self.training.as_ref()?;
        Some(FinalModel {
            name: classification.project_name.clone(),
            path: training.model_path.clone(),
            metrics: self.evaluation.clone()?,
            config: self.model.clone()?,
        })
    }
}

fn store<T: Serialize>(slot: &mut Option<T>, value: T) -> Result<Value, serde_json::Error> {
    let json = serde_json::to_value(&value)?;
    *slot = Some(value);
    Ok(json)
}

type Registry = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a session's token from the registry when its run ends.
struct Registration {
    registry: Registry,
    session_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.session_id);
    }
}

/// Drives build sessions through the eight stages.
///
/// One orchestrator can run many sessions concurrently; each `run` call owns
/// its session document and its cancellation token.
pub struct BuildOrchestrator {
    agents: StageAgents,
    store: Arc<dyn SessionStore>,
    options: OrchestratorOptions,
    sessions: Registry,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("agents", &self.agents)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BuildOrchestrator {
    pub fn new(
        agents: StageAgents,
        store: Arc<dyn SessionStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            agents,
            store,
            options,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            metrics: MetricsCollector::new(),
        }
    }

    /// Builds agents and options from `config` in one go.
    pub fn from_config(
        llm_client: Arc<dyn LlmProvider>,
        store: Arc<dyn SessionStore>,
        config: &ForgeConfig,
    ) -> Self {
        Self::new(
            StageAgents::from_config(llm_client, config),
            store,
            OrchestratorOptions::from(config),
        )
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Requests cancellation of an in-flight session.
    ///
    /// Returns `false` if no session with this id is running here.
    pub fn cancel(&self, session_id: &str) -> bool {
        match lock(&self.sessions).get(session_id) {
            Some(token) => {
                info!(session_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight session.
    pub fn cancel_all(&self) {
        for (session_id, token) in lock(&self.sessions).iter() {
            debug!(session_id = %session_id, "Cancelling session");
            token.cancel();
        }
    }

    /// The token of an in-flight session, for callers that want to cancel it
    /// from elsewhere.
    pub fn cancellation_token(&self, session_id: &str) -> Option<CancellationToken> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Session ids currently running on this orchestrator.
    pub fn running_sessions(&self) -> Vec<String> {
        lock(&self.sessions).keys().cloned().collect()
    }

    fn register(&self, session_id: &str) -> OrchestratorResult<(Registration, CancellationToken)> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains_key(session_id) {
            return Err(OrchestratorError::AlreadyRunning(session_id.to_string()));
        }
        let token = CancellationToken::new();
        sessions.insert(session_id.to_string(), token.clone());
        Ok((
            Registration {
                registry: Arc::clone(&self.sessions),
                session_id: session_id.to_string(),
            },
            token,
        ))
    }

    /// Runs one build session to a terminal state.
    ///
    /// A failing, timed-out or cancelled stage is not an `Err`: the session
    /// is persisted as failed and the returned outcome carries the message.
    /// `Err` means the driver itself could not proceed (store or state
    /// machine errors).
    pub async fn run(&self, request: BuildRequest) -> OrchestratorResult<BuildOutcome> {
        let (_registration, token) = self.register(&request.session_id)?;

        let session = BuildSession::new(&request.user_id, &request.session_id, &request.prompt);
        self.store.create(&session).await?;
        self.metrics.record_session_started();
        info!(
            session_id = %request.session_id,
            user_id = %request.user_id,
            "Build session created"
        );

        let mut ctx = BuildContext::default();
        let mut steps: Vec<StepResult> = Vec::new();
        let mut state = transition(&BuildState::Initializing, &BuildEvent::Start)?;
        self.persist(&request, &state, &steps, None).await?;

        let mut failure = None;
        while let Some(stage) = state.running_stage() {
            if token.is_cancelled() {
                failure = Some(OrchestratorError::Cancelled { stage: Some(stage) });
                break;
            }

            info!(session_id = %request.session_id, stage = %stage, "Starting stage");
            let started = Instant::now();
            let result = self.run_stage(stage, &ctx, &request, &token).await;
            self.metrics
                .record_stage(stage.as_str(), started.elapsed().as_secs_f64());

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let record = match ctx.absorb(stage, output) {
                Ok(record) => record,
                Err(e) => {
                    failure = Some(OrchestratorError::StageFailed {
                        stage,
                        source: AgentError::Json(e),
                    });
                    break;
                }
            };

            info!(
                session_id = %request.session_id,
                stage = %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
            steps.push(StepResult::completed(stage, record.result).with_logs(record.logs));
            state = transition(&state, &BuildEvent::StageSucceeded)?;
            self.persist(&request, &state, &steps, record.training_stats)
                .await?;
        }

        if let Some(failure) = failure {
            let message = failure.to_string();
            let stage = failure.stage().or_else(|| state.running_stage());
            error!(
                session_id = %request.session_id,
                stage = ?stage.map(|s| s.as_str()),
                error = %message,
                "Build session failed"
            );

            let mut step = StepResult::error(&message, stage);
            if let Some(diagnosis) = self.diagnose(&failure, &ctx).await {
                if let (Value::Object(result), Ok(diagnosis)) =
                    (&mut step.result, serde_json::to_value(&diagnosis))
                {
                    result.insert("diagnosis".to_string(), diagnosis);
                }
            }
            steps.push(step);
            state = transition(&state, &BuildEvent::StageFailed { message })?;
            self.persist(&request, &state, &steps, None).await?;
        } else {
            info!(session_id = %request.session_id, "Build session completed");
        }

        self.metrics.record_session_finished(state.status().as_str());
        Ok(self.outcome(&request, &state, ctx))
    }

    /// Runs one stage under the cancellation token and the stage timeout.
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &BuildContext,
        request: &BuildRequest,
        token: &CancellationToken,
    ) -> OrchestratorResult<StageOutput> {
        let timeout = self.options.stage_timeout;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(OrchestratorError::Cancelled { stage: Some(stage) }),
            result = tokio::time::timeout(timeout, self.execute(stage, ctx, request)) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(source)) => Err(OrchestratorError::StageFailed { stage, source }),
                Err(_) => Err(OrchestratorError::StageTimeout { stage, timeout }),
            },
        }
    }

    async fn execute(
        &self,
        stage: Stage,
        ctx: &BuildContext,
        request: &BuildRequest,
    ) -> AgentResult<StageOutput> {
        let agents = &self.agents;
        let output = match stage {
            Stage::Classify => {
                StageOutput::Classification(agents.classifier.classify(&request.prompt).await?)
            }
            Stage::Dataset => {
                let classification = require(&ctx.classification, stage, "classification")?;
                StageOutput::Dataset(
                    agents
                        .dataset
                        .select(&request.prompt, classification.task_type)
                        .await?,
                )
            }
            Stage::ExamineDataset => {
                let dataset = require(&ctx.dataset, stage, "dataset")?;
                StageOutput::Examination(agents.examiner.examine(dataset).await?)
            }
            Stage::Preprocessing => {
                let classification = require(&ctx.classification, stage, "classification")?;
                let dataset = require(&ctx.dataset, stage, "dataset")?;
                let profile = require(&ctx.profile, stage, "dataset profile")?;
                StageOutput::Preprocessing(
                    agents
                        .preprocessing
                        .plan(classification.task_type, dataset, profile)
                        .await?,
                )
            }
            Stage::ModelBuilder => {
                let classification = require(&ctx.classification, stage, "classification")?;
                let profile = require(&ctx.profile, stage, "dataset profile")?;
                let preprocessing = require(&ctx.preprocessing, stage, "preprocessing plan")?;
                StageOutput::Model(
                    agents
                        .model_builder
                        .plan(classification.task_type, profile, preprocessing)
                        .await?,
                )
            }
            Stage::Training => {
                let dataset = require(&ctx.dataset, stage, "dataset")?;
                let model = require(&ctx.model, stage, "model plan")?;
                StageOutput::Training(self.train(dataset, model, request).await?)
            }
            Stage::Evaluation => {
                let dataset = require(&ctx.dataset, stage, "dataset")?;
                let training = require(&ctx.training, stage, "training result")?;
                StageOutput::Evaluation(
                    agents
                        .evaluator
                        .evaluate(&training.model_path, dataset)
                        .await?,
                )
            }
            Stage::Deployment => {
                let classification = require(&ctx.classification, stage, "classification")?;
                let training = require(&ctx.training, stage, "training result")?;
                let evaluation = require(&ctx.evaluation, stage, "evaluation result")?;
                StageOutput::Deployment(
                    agents
                        .deployment
                        .plan(
                            &classification.project_name,
                            classification.task_type,
                            &training.model_path,
                            evaluation,
                        )
                        .await?,
                )
            }
        };
        Ok(output)
    }

    /// Trains while relaying throttled progress snapshots to the store.
    async fn train(
        &self,
        dataset: &DatasetSelection,
        model: &ModelPlan,
        request: &BuildRequest,
    ) -> AgentResult<TrainingResult> {
        let (tx, mut updates) = mpsc::unbounded_channel();
        let progress = ProgressSender::new(tx, self.options.progress_every_epochs);
        let training = self.agents.trainer.train(dataset, model, progress);
        tokio::pin!(training);

        let result = loop {
            tokio::select! {
                result = &mut training => break result,
                Some(stats) = updates.recv() => {
                    self.write_progress(request, stats).await;
                }
            }
        };

        // Snapshots sent just before the backend returned.
        while let Ok(stats) = updates.try_recv() {
            self.write_progress(request, stats).await;
        }
        result
    }

    /// Progress writes are best-effort; the final stats go out with the step.
    async fn write_progress(&self, request: &BuildRequest, stats: TrainingStats) {
        let epoch = stats.current_epoch;
        let update = SessionUpdate::new().training_stats(stats);
        match self
            .store
            .update(&request.user_id, &request.session_id, &update)
            .await
        {
            Ok(_) => debug!(session_id = %request.session_id, epoch, "Persisted training progress"),
            Err(e) => warn!(
                session_id = %request.session_id,
                epoch,
                error = %e,
                "Failed to persist training progress"
            ),
        }
    }

    async fn persist(
        &self,
        request: &BuildRequest,
        state: &BuildState,
        steps: &[StepResult],
        training_stats: Option<TrainingStats>,
    ) -> OrchestratorResult<()> {
        let mut update = SessionUpdate::new()
            .status(state.status())
            .current_step(state.current_step())
            .steps(steps.to_vec());
        if let Some(stats) = training_stats {
            update = update.training_stats(stats);
        }
        self.store
            .update(&request.user_id, &request.session_id, &update)
            .await?;
        Ok(())
    }

    /// Asks the diagnoser about a failure. Cancellations are not diagnosed
    /// and a failing diagnosis is only logged.
    async fn diagnose(
        &self,
        failure: &OrchestratorError,
        ctx: &BuildContext,
    ) -> Option<ErrorDiagnosis> {
        let diagnoser = self.agents.diagnoser.as_ref()?;
        if matches!(failure, OrchestratorError::Cancelled { .. }) {
            return None;
        }
        let stage = failure.stage().map_or("unknown", |s| s.as_str());
        let diagnosis = tokio::time::timeout(
            self.options.stage_timeout,
            diagnoser.diagnose(stage, &failure.to_string(), ctx.to_json()),
        )
        .await;

        match diagnosis {
            Ok(Ok(diagnosis)) => Some(diagnosis),
            Ok(Err(e)) => {
                warn!(stage, error = %e, "Failure diagnosis failed");
                None
            }
            Err(_) => {
                warn!(stage, "Failure diagnosis timed out");
                None
            }
        }
    }

    fn outcome(&self, request: &BuildRequest, state: &BuildState, ctx: BuildContext) -> BuildOutcome {
        let (error, failed_stage) = match state {
            BuildState::Failed { stage, message } => (Some(message.clone()), *stage),
            _ => (None, None),
        };
        let completed = matches!(state, BuildState::Completed);

        BuildOutcome {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            status: state.status(),
            pipeline: ctx.to_json(),
            final_model: if completed { ctx.final_model() } else { None },
            deployment: if completed { ctx.deployment } else { None },
            error,
            failed_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::MockLlmProvider;
    use crate::session::{CurrentStep, InMemorySessionStore, SessionStatus};
    use serde_json::json;

    fn orchestrator(reply: &str, config: &ForgeConfig) -> BuildOrchestrator {
        BuildOrchestrator::from_config(
            Arc::new(MockLlmProvider::new(reply)),
            Arc::new(InMemorySessionStore::new()),
            config,
        )
    }

    #[test]
    fn test_build_request_generates_session_id() {
        let a = BuildRequest::new("u1", "goal");
        let b = BuildRequest::new("u1", "goal");
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.clone().with_session_id("s1").session_id, "s1");
    }

    #[test]
    fn test_options_from_config() {
        let config = ForgeConfig::default()
            .with_stage_timeout(Duration::from_secs(5))
            .with_progress_every_epochs(2);
        let options = OrchestratorOptions::from(&config);
        assert_eq!(options.stage_timeout, Duration::from_secs(5));
        assert_eq!(options.progress_every_epochs, 2);
    }

    #[test]
    fn test_diagnoser_follows_config() {
        let llm: Arc<dyn LlmProvider> = Arc::new(MockLlmProvider::new("{}"));
        let off = StageAgents::from_config(Arc::clone(&llm), &ForgeConfig::default());
        assert!(off.diagnoser.is_none());
        let on = StageAgents::from_config(llm, &ForgeConfig::default().with_diagnose_failures(true));
        assert!(on.diagnoser.is_some());
    }

    #[test]
    fn test_cancel_unknown_session() {
        let orchestrator = orchestrator("{}", &ForgeConfig::default());
        assert!(!orchestrator.cancel("nope"));
        assert!(orchestrator.cancellation_token("nope").is_none());
        assert!(orchestrator.running_sessions().is_empty());
    }

    #[test]
    fn test_registration_is_exclusive_and_released() {
        let orchestrator = orchestrator("{}", &ForgeConfig::default());
        let (registration, token) = orchestrator.register("s1").expect("register");
        assert!(matches!(
            orchestrator.register("s1"),
            Err(OrchestratorError::AlreadyRunning(_))
        ));
        assert!(orchestrator.cancel("s1"));
        assert!(token.is_cancelled());

        drop(registration);
        assert!(orchestrator.running_sessions().is_empty());
        assert!(orchestrator.register("s1").is_ok());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let ctx = BuildContext::default();
        let err = require(&ctx.dataset, Stage::ExamineDataset, "dataset").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Stage 'examine_dataset' is missing its input 'dataset'"
        );
    }

    #[test]
    fn test_absorb_records_substitution_in_logs() {
        let mut ctx = BuildContext::default();
        let record = ctx
            .absorb(
                Stage::ExamineDataset,
                StageOutput::Examination(Examination {
                    profile: DatasetProfile::fallback(),
                    substitution: Some("script exited with code 1".to_string()),
                }),
            )
            .expect("absorb");

        assert_eq!(record.logs.len(), 1);
        assert!(record.logs[0].contains("script exited with code 1"));
        assert_eq!(record.result["shape"], json!([1000, 2]));
        assert!(ctx.profile.is_some());
        assert_eq!(ctx.to_json()["examine_dataset"]["shape"], json!([1000, 2]));
    }

    #[tokio::test]
    async fn test_classification_failure_fails_session() {
        let orchestrator = orchestrator("not json at all", &ForgeConfig::default());
        let outcome = orchestrator
            .run(BuildRequest::new("u1", "Detect spam emails").with_session_id("s1"))
            .await
            .expect("run");

        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(outcome.failed_stage, Some(Stage::Classify));
        assert!(outcome.final_model.is_none());

        let session = orchestrator
            .store()
            .get("u1", "s1")
            .await
            .expect("get")
            .expect("session");
        assert_eq!(session.current_step, CurrentStep::Error);
        assert_eq!(session.steps.len(), 1);
        assert_eq!(session.steps[0].result["stage"], json!("classify"));
        assert!(orchestrator.running_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_session_is_rejected_by_store() {
        let orchestrator = orchestrator(
            r#"{"taskType":"NLP","projectName":"Spam"}"#,
            &ForgeConfig::default(),
        );
        let request = BuildRequest::new("u1", "goal").with_session_id("dup");
        orchestrator
            .store()
            .create(&BuildSession::new("u1", "dup", "goal"))
            .await
            .expect("create");

        let err = orchestrator.run(request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(_)));
    }
}
