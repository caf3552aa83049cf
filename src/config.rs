//! Configuration for the build orchestrator.
//!
//! Covers the completion-service request settings, stage timeouts, which
//! backend performs analysis, training and evaluation, and where session
//! documents are stored.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::agents::AnalysisFallback;
use crate::backend::training::DEFAULT_MODEL_OUTPUT_DIR;
use crate::error::StoreError;
use crate::flow::runner::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::flow::FlowOptions;
use crate::session::{FileSessionStore, InMemorySessionStore, SessionStore, SqliteSessionStore};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How dataset analysis is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Always return the canned profile.
    #[default]
    Canned,
    /// Run the analysis script.
    Script,
}

/// How training or evaluation is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// In-process simulation.
    #[default]
    Simulate,
    /// Run the external script.
    Script,
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "canned" => Ok(AnalysisMode::Canned),
            "script" => Ok(AnalysisMode::Script),
            other => Err(format!("expected 'canned' or 'script', got '{}'", other)),
        }
    }
}

impl FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulate" | "simulated" => Ok(BackendMode::Simulate),
            "script" => Ok(BackendMode::Script),
            other => Err(format!("expected 'simulate' or 'script', got '{}'", other)),
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Canned => write!(f, "canned"),
            AnalysisMode::Script => write!(f, "script"),
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Simulate => write!(f, "simulate"),
            BackendMode::Script => write!(f, "script"),
        }
    }
}

/// Where session documents live.
///
/// Parsed from `memory`, `file:<directory>` or a `sqlite:` URL such as
/// `sqlite://sessions.db`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Memory,
    File(PathBuf),
    Sqlite(String),
}

impl Default for StoreTarget {
    fn default() -> Self {
        StoreTarget::File(PathBuf::from("./sessions"))
    }
}

impl FromStr for StoreTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory" {
            Ok(StoreTarget::Memory)
        } else if let Some(dir) = s.strip_prefix("file:") {
            if dir.is_empty() {
                Err("file store needs a directory: 'file:<dir>'".to_string())
            } else {
                Ok(StoreTarget::File(PathBuf::from(dir)))
            }
        } else if s.starts_with("sqlite:") {
            Ok(StoreTarget::Sqlite(s.to_string()))
        } else {
            Err(format!(
                "expected 'memory', 'file:<dir>' or 'sqlite:<url>', got '{}'",
                s
            ))
        }
    }
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreTarget::Memory => write!(f, "memory"),
            StoreTarget::File(dir) => write!(f, "file:{}", dir.display()),
            StoreTarget::Sqlite(url) => write!(f, "{}", url),
        }
    }
}

impl StoreTarget {
    /// Opens the store this target names.
    pub async fn open(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
        Ok(match self {
            StoreTarget::Memory => Arc::new(InMemorySessionStore::new()),
            StoreTarget::File(dir) => Arc::new(FileSessionStore::new(dir.clone())),
            StoreTarget::Sqlite(url) => Arc::new(SqliteSessionStore::connect(url).await?),
        })
    }
}

/// Configuration for the build orchestrator.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // Completion service
    /// Model identifier; empty uses the client's default model.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,

    // Execution
    /// Upper bound on a single stage.
    pub stage_timeout: Duration,
    /// Persist training progress at most once per this many epochs.
    pub progress_every_epochs: u32,
    /// Ask the error-diagnosis agent about failed stages.
    pub diagnose_failures: bool,

    // Backends
    pub analysis_mode: AnalysisMode,
    pub on_analysis_unavailable: AnalysisFallback,
    pub training_mode: BackendMode,
    pub evaluation_mode: BackendMode,
    /// Directory holding the analysis, training and evaluation scripts.
    pub scripts_dir: PathBuf,
    /// Interpreter used to run the scripts.
    pub python: String,
    pub model_output_dir: PathBuf,
    /// Seed for the simulated backends; random when unset.
    pub simulation_seed: Option<u64>,
    /// Pause between simulated epochs.
    pub simulated_epoch_delay: Duration,

    // Storage
    pub store: StoreTarget,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stage_timeout: Duration::from_secs(600),
            progress_every_epochs: 5,
            diagnose_failures: false,
            analysis_mode: AnalysisMode::default(),
            on_analysis_unavailable: AnalysisFallback::default(),
            training_mode: BackendMode::default(),
            evaluation_mode: BackendMode::default(),
            scripts_dir: PathBuf::from("./scripts"),
            python: "python3".to_string(),
            model_output_dir: PathBuf::from(DEFAULT_MODEL_OUTPUT_DIR),
            simulation_seed: None,
            simulated_epoch_delay: Duration::ZERO,
            store: StoreTarget::default(),
        }
    }
}

impl ForgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables (all optional):
    /// - `FORGE_MODEL`: model identifier (default: the client's default)
    /// - `FORGE_TEMPERATURE`: sampling temperature (default: 0.2)
    /// - `FORGE_MAX_TOKENS`: completion budget per call (default: 2048)
    /// - `FORGE_STAGE_TIMEOUT_SECS`: per-stage timeout (default: 600)
    /// - `FORGE_PROGRESS_EVERY_EPOCHS`: progress write interval (default: 5)
    /// - `FORGE_DIAGNOSE_FAILURES`: diagnose failed stages (default: false)
    /// - `FORGE_ANALYSIS_MODE`: `canned` or `script` (default: canned)
    /// - `FORGE_ON_ANALYSIS_UNAVAILABLE`: `use_fallback_profile` or `fail`
    /// - `FORGE_TRAINING_MODE` / `FORGE_EVALUATION_MODE`: `simulate` or `script`
    /// - `FORGE_SCRIPTS_DIR`: script directory (default: ./scripts)
    /// - `FORGE_PYTHON`: script interpreter (default: python3)
    /// - `FORGE_MODEL_OUTPUT_DIR`: trained model directory (default: /tmp/trained_models)
    /// - `FORGE_SIMULATION_SEED`: seed for simulated backends
    /// - `FORGE_SIMULATED_EPOCH_DELAY_MS`: pause between simulated epochs
    /// - `FORGE_STORE`: `memory`, `file:<dir>` or `sqlite:<url>` (default: file:./sessions)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ForgeConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("FORGE_MODEL") {
            config.model = val;
        }
        if let Some(val) = lookup("FORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "FORGE_TEMPERATURE")?;
        }
        if let Some(val) = lookup("FORGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "FORGE_MAX_TOKENS")?;
        }

        if let Some(val) = lookup("FORGE_STAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_STAGE_TIMEOUT_SECS")?;
            config.stage_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("FORGE_PROGRESS_EVERY_EPOCHS") {
            config.progress_every_epochs = parse_env_value(&val, "FORGE_PROGRESS_EVERY_EPOCHS")?;
        }
        if let Some(val) = lookup("FORGE_DIAGNOSE_FAILURES") {
            config.diagnose_failures = parse_env_bool(&val, "FORGE_DIAGNOSE_FAILURES")?;
        }

        if let Some(val) = lookup("FORGE_ANALYSIS_MODE") {
            config.analysis_mode = parse_env_value(&val, "FORGE_ANALYSIS_MODE")?;
        }
        if let Some(val) = lookup("FORGE_ON_ANALYSIS_UNAVAILABLE") {
            config.on_analysis_unavailable =
                parse_env_value(&val, "FORGE_ON_ANALYSIS_UNAVAILABLE")?;
        }
        if let Some(val) = lookup("FORGE_TRAINING_MODE") {
            config.training_mode = parse_env_value(&val, "FORGE_TRAINING_MODE")?;
        }
        if let Some(val) = lookup("FORGE_EVALUATION_MODE") {
            config.evaluation_mode = parse_env_value(&val, "FORGE_EVALUATION_MODE")?;
        }
        if let Some(val) = lookup("FORGE_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("FORGE_PYTHON") {
            config.python = val;
        }
        if let Some(val) = lookup("FORGE_MODEL_OUTPUT_DIR") {
            config.model_output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("FORGE_SIMULATION_SEED") {
            config.simulation_seed = Some(parse_env_value(&val, "FORGE_SIMULATION_SEED")?);
        }
        if let Some(val) = lookup("FORGE_SIMULATED_EPOCH_DELAY_MS") {
            let millis: u64 = parse_env_value(&val, "FORGE_SIMULATED_EPOCH_DELAY_MS")?;
            config.simulated_epoch_delay = Duration::from_millis(millis);
        }

        if let Some(val) = lookup("FORGE_STORE") {
            config.store = parse_env_value(&val, "FORGE_STORE")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.stage_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "stage_timeout must be greater than 0".to_string(),
            ));
        }
        if self.progress_every_epochs == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_every_epochs must be greater than 0".to_string(),
            ));
        }
        let uses_scripts = self.analysis_mode == AnalysisMode::Script
            || self.training_mode == BackendMode::Script
            || self.evaluation_mode == BackendMode::Script;
        if uses_scripts && self.python.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "python interpreter cannot be empty when a script backend is selected".to_string(),
            ));
        }
        if self.model_output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model_output_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Request settings for the prompt flows.
    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions::default()
            .with_model(self.model.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_progress_every_epochs(mut self, epochs: u32) -> Self {
        self.progress_every_epochs = epochs;
        self
    }

    pub fn with_diagnose_failures(mut self, enabled: bool) -> Self {
        self.diagnose_failures = enabled;
        self
    }

    pub fn with_analysis_mode(mut self, mode: AnalysisMode) -> Self {
        self.analysis_mode = mode;
        self
    }

    pub fn with_on_analysis_unavailable(mut self, policy: AnalysisFallback) -> Self {
        self.on_analysis_unavailable = policy;
        self
    }

    pub fn with_training_mode(mut self, mode: BackendMode) -> Self {
        self.training_mode = mode;
        self
    }

    pub fn with_evaluation_mode(mut self, mode: BackendMode) -> Self {
        self.evaluation_mode = mode;
        self
    }

    pub fn with_scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_model_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_output_dir = dir.into();
        self
    }

    pub fn with_simulation_seed(mut self, seed: u64) -> Self {
        self.simulation_seed = Some(seed);
        self
    }

    pub fn with_simulated_epoch_delay(mut self, delay: Duration) -> Self {
        self.simulated_epoch_delay = delay;
        self
    }

    pub fn with_store(mut self, store: StoreTarget) -> Self {
        self.store = store;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}': {}", value, e),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
