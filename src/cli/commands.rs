//! CLI command definitions for pipeline-forge.
//!
//! `build` runs one session end to end, `show` and `list` read stored
//! session documents, and `watch` follows a session another process is
//! running.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::agents::AnalysisFallback;
use crate::config::{AnalysisMode, BackendMode, ForgeConfig, StoreTarget};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::orchestrator::{BuildOrchestrator, BuildOutcome, BuildRequest};
use crate::session::{BuildSession, SessionStore};

/// Default user for sessions started from the command line.
const DEFAULT_USER: &str = "local";

/// Default polling interval for `watch`.
const DEFAULT_WATCH_INTERVAL_MS: u64 = 1000;

/// Turn a natural-language ML goal into a planned, trained and deployable pipeline.
#[derive(Parser)]
#[command(name = "pipeline-forge")]
#[command(about = "Run ML build sessions through staged LLM agents")]
#[command(version)]
#[command(
    long_about = "pipeline-forge classifies a goal, selects and profiles a dataset, plans preprocessing and a model, trains, evaluates and plans deployment.\n\nEvery stage is recorded in a session document that `show` and `watch` can read.\n\nExample usage:\n  pipeline-forge build --prompt \"Detect fraudulent credit card transactions\" --store file:./sessions"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a build session for a goal.
    Build(BuildArgs),

    /// Print a stored session document.
    Show(ShowArgs),

    /// Follow a session until it completes or fails.
    Watch(WatchArgs),

    /// List a user's sessions.
    #[command(alias = "ls")]
    List(ListArgs),
}

/// Arguments for `pipeline-forge build`.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// What the model should do, in plain words.
    #[arg(short, long)]
    pub prompt: String,

    /// User the session belongs to.
    #[arg(short, long, default_value = DEFAULT_USER)]
    pub user: String,

    /// Session id; generated when omitted.
    #[arg(long)]
    pub session_id: Option<String>,

    /// Model for the prompt flows (overrides FORGE_MODEL).
    #[arg(short, long)]
    pub model: Option<String>,

    /// OpenRouter API key (can also be set via OPENROUTER_API_KEY or LITELLM_API_KEY env var).
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,

    /// Session store: memory, file:<dir> or sqlite:<url> (overrides FORGE_STORE).
    #[arg(long)]
    pub store: Option<StoreTarget>,

    /// Dataset analysis: canned or script.
    #[arg(long)]
    pub analysis_mode: Option<AnalysisMode>,

    /// When analysis fails: use_fallback_profile or fail.
    #[arg(long)]
    pub on_analysis_unavailable: Option<AnalysisFallback>,

    /// Training backend: simulate or script.
    #[arg(long)]
    pub training_mode: Option<BackendMode>,

    /// Evaluation backend: simulate or script.
    #[arg(long)]
    pub evaluation_mode: Option<BackendMode>,

    /// Per-stage timeout in seconds.
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Seed for the simulated training and evaluation backends.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Ask the error-diagnosis agent about a failed stage.
    #[arg(long)]
    pub diagnose: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,

    /// Output the outcome as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `pipeline-forge show`.
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Session id to print.
    pub session_id: String,

    /// User the session belongs to.
    #[arg(short, long, default_value = DEFAULT_USER)]
    pub user: String,

    /// Session store: file:<dir> or sqlite:<url> (overrides FORGE_STORE).
    #[arg(long)]
    pub store: Option<StoreTarget>,
}

/// Arguments for `pipeline-forge watch`.
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Session id to follow.
    pub session_id: String,

    /// User the session belongs to.
    #[arg(short, long, default_value = DEFAULT_USER)]
    pub user: String,

    /// Session store: file:<dir> or sqlite:<url> (overrides FORGE_STORE).
    #[arg(long)]
    pub store: Option<StoreTarget>,

    /// Polling interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_WATCH_INTERVAL_MS)]
    pub interval_ms: u64,
}

/// Arguments for `pipeline-forge list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// User whose sessions to list.
    #[arg(short, long, default_value = DEFAULT_USER)]
    pub user: String,

    /// Session store: file:<dir> or sqlite:<url> (overrides FORGE_STORE).
    #[arg(long)]
    pub store: Option<StoreTarget>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build(args) => run_build_command(args).await,
        Commands::Show(args) => run_show_command(args).await,
        Commands::Watch(args) => run_watch_command(args).await,
        Commands::List(args) => run_list_command(args).await,
    }
}

// ============================================================================
// Build
// ============================================================================

fn build_config(args: &BuildArgs) -> anyhow::Result<ForgeConfig> {
    let mut config = ForgeConfig::from_env()?;

    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }
    if let Some(store) = &args.store {
        config = config.with_store(store.clone());
    }
    if let Some(mode) = args.analysis_mode {
        config = config.with_analysis_mode(mode);
    }
    if let Some(policy) = args.on_analysis_unavailable {
        config = config.with_on_analysis_unavailable(policy);
    }
    if let Some(mode) = args.training_mode {
        config = config.with_training_mode(mode);
    }
    if let Some(mode) = args.evaluation_mode {
        config = config.with_evaluation_mode(mode);
    }
    if let Some(secs) = args.stage_timeout {
        config = config.with_stage_timeout(Duration::from_secs(secs));
    }
    if let Some(seed) = args.seed {
        config = config.with_simulation_seed(seed);
    }
    if args.diagnose {
        config = config.with_diagnose_failures(true);
    }

    config.validate()?;
    Ok(config)
}

async fn run_build_command(args: BuildArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    if args.metrics {
        init_metrics()?;
    }

    let llm_client = build_llm_client(args.api_key.clone())?;
    let store = config.store.open().await?;
    let orchestrator = Arc::new(BuildOrchestrator::from_config(llm_client, store, &config));

    let mut request = BuildRequest::new(args.user.clone(), args.prompt.clone());
    if let Some(session_id) = &args.session_id {
        request = request.with_session_id(session_id.clone());
    }
    info!(
        session_id = %request.session_id,
        store = %config.store,
        training_mode = %config.training_mode,
        "Starting build"
    );

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        let session_id = request.session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(session_id = %session_id, "Interrupted, cancelling session");
                orchestrator.cancel(&session_id);
            }
        })
    };
    let result = orchestrator.run(request).await;
    interrupt.abort();
    let outcome = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    if args.metrics {
        println!("{}", export_metrics());
    }

    if outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Build session {} failed: {}",
            outcome.session_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        ))
    }
}

fn print_outcome(outcome: &BuildOutcome) {
    if outcome.is_success() {
        println!("✓ Build completed");
    } else {
        println!("✗ Build failed");
    }
    println!("  Session: {}", outcome.session_id);
    if let Some(model) = &outcome.final_model {
        println!("  Project: {}", model.name);
        println!("  Model:   {} ({})", model.config.model_type, model.config.framework);
        println!("  Path:    {}", model.path);
        println!(
            "  Metrics: accuracy {:.4}, f1 {:.4}",
            model.metrics.accuracy, model.metrics.f1_score
        );
    }
    if let Some(deployment) = &outcome.deployment {
        println!("  Deploy:  {} at {}", deployment.deployment_type, deployment.endpoint_url);
    }
    if let Some(error) = &outcome.error {
        match outcome.failed_stage {
            Some(stage) => println!("  Error in {}: {}", stage, error),
            None => println!("  Error: {}", error),
        }
    }
}

fn build_llm_client(api_key: Option<String>) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let resolved_api_key = api_key.or_else(|| std::env::var("OPENROUTER_API_KEY").ok());

    if let Some(key) = resolved_api_key {
        info!("Using OpenRouter with specified API key");
        Ok(Arc::new(LiteLlmClient::new_with_defaults(key)))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY, or LITELLM_API_BASE/LITELLM_API_KEY.",
                e
            )
        })?))
    }
}

// ============================================================================
// Show / list / watch
// ============================================================================

async fn open_store(target: Option<StoreTarget>) -> anyhow::Result<Arc<dyn SessionStore>> {
    let target = match target {
        Some(target) => target,
        None => ForgeConfig::from_env()?.store,
    };
    if target == StoreTarget::Memory {
        anyhow::bail!("The memory store only lives inside a running build; use file:<dir> or sqlite:<url>");
    }
    Ok(target.open().await?)
}

async fn load_session(
    store: &dyn SessionStore,
    user: &str,
    session_id: &str,
) -> anyhow::Result<BuildSession> {
    store
        .get(user, session_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Session '{}' not found for user '{}'", session_id, user))
}

async fn run_show_command(args: ShowArgs) -> anyhow::Result<()> {
    let store = open_store(args.store).await?;
    let session = load_session(store.as_ref(), &args.user, &args.session_id).await?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

async fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let store = open_store(args.store).await?;
    let sessions = store.list_for_user(&args.user).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions for user '{}'.", args.user);
        return Ok(());
    }
    for session in &sessions {
        println!(
            "{}  {:<11} {:<16} {}",
            session.session_id,
            session.status.as_str(),
            session.current_step.as_str(),
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// One line describing where a session is.
fn progress_line(session: &BuildSession) -> String {
    let mut line = format!(
        "[{}] {} ({}/{} steps)",
        session.status,
        session.current_step,
        session.steps.iter().filter(|s| !s.is_error()).count(),
        crate::session::Stage::ALL.len()
    );
    if let Some(stats) = &session.training_stats {
        line.push_str(&format!(
            " epoch {}/{} loss {:.4} acc {:.4}",
            stats.current_epoch, stats.total_epochs, stats.loss, stats.accuracy
        ));
    }
    line
}

async fn run_watch_command(args: WatchArgs) -> anyhow::Result<()> {
    let store = open_store(args.store).await?;
    let interval = Duration::from_millis(args.interval_ms.max(50));
    let mut last_line = String::new();

    loop {
        let session = load_session(store.as_ref(), &args.user, &args.session_id).await?;
        let line = progress_line(&session);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }

        if session.status.is_terminal() {
            if let Some(error) = session.error_step() {
                println!("{}", serde_json::to_string_pretty(&error.result)?);
            }
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}
