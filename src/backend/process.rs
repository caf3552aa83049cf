//! Line-oriented JSON protocol with external analysis/training scripts.
//!
//! Scripts print one JSON object per stdout line. Recognised messages:
//!
//! | line                                                        | meaning              |
//! |-------------------------------------------------------------|----------------------|
//! | `{"type":"training_update","epoch":3,"loss":..,"accuracy":..}` | epoch progress     |
//! | `{"status":"completed","model_path":"..",..}`               | training finished    |
//! | `{"status":"complete","analysis":{..}}`                     | analysis result      |
//! | `{"type":"evaluation_result",..}`                           | evaluation result    |
//! | `{"error":".."}`                                            | script-side failure  |
//!
//! Anything else that parses as JSON is passed through as
//! [`ScriptMessage::Other`]; lines that are not JSON are logged and skipped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agents::types::EpochMetrics;
use crate::error::ProcessError;

/// Default interpreter for the bundled scripts.
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Characters of stderr kept in a [`ProcessError::NonZeroExit`].
const STDERR_TAIL_CHARS: usize = 2000;

/// One decoded stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptMessage {
    TrainingUpdate(EpochMetrics),
    TrainingComplete {
        model_path: Option<String>,
        final_accuracy: Option<f64>,
        final_loss: Option<f64>,
    },
    Analysis(Value),
    Evaluation(Value),
    Error(String),
    Other(Value),
}

impl ScriptMessage {
    /// Classifies a decoded JSON line.
    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str);
        let status = value.get("status").and_then(Value::as_str);

        match (kind, status) {
            (Some("training_update"), _) => {
                match serde_json::from_value::<EpochMetrics>(value.clone()) {
                    Ok(metrics) => ScriptMessage::TrainingUpdate(metrics),
                    Err(_) => ScriptMessage::Other(value),
                }
            }
            (Some("evaluation_result"), _) => ScriptMessage::Evaluation(value),
            (_, Some("completed")) => ScriptMessage::TrainingComplete {
                model_path: value
                    .get("model_path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                final_accuracy: value.get("final_accuracy").and_then(Value::as_f64),
                final_loss: value.get("final_loss").and_then(Value::as_f64),
            },
            (_, Some("complete")) => match value.get("analysis") {
                Some(analysis) => ScriptMessage::Analysis(analysis.clone()),
                None => ScriptMessage::Other(value),
            },
            _ => match value.get("error").and_then(Value::as_str) {
                Some(message) => ScriptMessage::Error(message.to_string()),
                None => ScriptMessage::Other(value),
            },
        }
    }
}

/// Spawns scripts from a directory and streams their decoded output.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    interpreter_args: Vec<String>,
    scripts_dir: PathBuf,
}

impl ScriptRunner {
    /// Creates a runner invoking `interpreter -u <scripts_dir>/<script> args..`.
    pub fn new(interpreter: impl Into<String>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: vec!["-u".to_string()],
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Replaces the arguments passed to the interpreter before the script path.
    pub fn with_interpreter_args(mut self, args: Vec<String>) -> Self {
        self.interpreter_args = args;
        self
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Runs `script` with `args`, handing every decoded line to `on_message`.
    ///
    /// The child is killed if the returned future is dropped, so wrapping the
    /// call in a timeout or a cancellation `select!` stops the process too.
    pub async fn run_lines<F>(
        &self,
        script: &str,
        args: &[&str],
        mut on_message: F,
    ) -> Result<(), ProcessError>
    where
        F: FnMut(ScriptMessage) + Send,
    {
        let script_path = self.scripts_dir.join(script);
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args)
            .arg(&script_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(script = %script_path.display(), ?args, "Starting script");

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: script.to_string(),
            reason: e.to_string(),
        })?;

        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ProcessError::SpawnFailed {
                program: script.to_string(),
                reason: "stdout/stderr not captured".to_string(),
            });
        };

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await.map(|_| buf)
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => on_message(ScriptMessage::from_value(value)),
                Err(_) => debug!(script, line = trimmed, "Skipping non-JSON script output"),
            }
        }

        let status = child.wait().await?;
        let stderr_content = match stderr_task.await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                warn!(script, error = %e, "Error reading script stderr");
                String::new()
            }
            Err(e) => {
                warn!(script, error = %e, "Script stderr reader panicked");
                String::new()
            }
        };

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(ProcessError::NonZeroExit {
                program: script.to_string(),
                code,
                stderr: tail(&stderr_content, STDERR_TAIL_CHARS),
            });
        }

        info!(script, "Script finished");
        Ok(())
    }
}

fn tail(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().skip(count - max_chars).collect()
    }
}
