//! Execution runner abstraction for the external CAD engine.
//!
//! The [`EngineRunner`] trait decouples the iteration loop from the actual
//! engine invocation. [`CommandEngine`] spawns the configured executable;
//! [`SimulatedEngine`] is a deterministic offline path used when no engine
//! command is configured. Tests use scripted runners that return
//! predetermined results without spawning processes.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::io::process::run_command_with_timeout;

/// The run cannot make progress regardless of iteration count: engine binary
/// missing, artifact storage unwritable. Aborts the run when it surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfrastructureError {
    pub message: String,
}

impl std::fmt::Display for InfrastructureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "infrastructure error: {}", self.message)
    }
}

impl std::error::Error for InfrastructureError {}

/// Parameters for one engine invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Script already written to the per-iteration artifact path.
    pub script_path: PathBuf,
    /// Maximum time to wait for the engine to complete.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Outcome of one engine invocation. Never raises on non-zero exit; the
/// orchestrator interprets exit code and log content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// `None` when the process was terminated by a signal (timeout, cancel).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    /// True when produced by the simulated engine rather than a real one.
    pub simulated: bool,
}

impl ExecutionResult {
    /// Combined stream content for classification.
    pub fn combined_log(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Abstraction over CAD engine backends.
pub trait EngineRunner {
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionResult>;
}

/// Engine that spawns the configured external command.
pub struct CommandEngine {
    command: Vec<String>,
    headless: bool,
}

impl CommandEngine {
    pub fn new(command: Vec<String>, headless: bool) -> Self {
        Self { command, headless }
    }
}

impl EngineRunner for CommandEngine {
    #[instrument(skip_all, fields(script = %request.script_path.display()))]
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionResult> {
        info!(command = ?self.command, "starting engine execution");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).arg(&request.script_path);
        if self.headless && std::env::var_os("QT_QPA_PLATFORM").is_none() {
            cmd.env("QT_QPA_PLATFORM", "offscreen");
        }

        let started = Instant::now();
        let output = match run_command_with_timeout(
            cmd,
            request.timeout,
            request.output_limit_bytes,
            cancel,
        ) {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == ErrorKind::NotFound);
                if missing {
                    return Err(err.context(InfrastructureError {
                        message: format!("engine binary {:?} not found", self.command[0]),
                    }));
                }
                return Err(err.context("run engine command"));
            }
        };

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "engine timed out");
        }
        Ok(ExecutionResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
            timed_out: output.timed_out,
            cancelled: output.cancelled,
            simulated: false,
        })
    }
}

/// Deterministic offline engine used when no command is configured.
///
/// Scripts containing an explicit `raise` fail; everything else succeeds.
/// Output lines carry a `[simulated]` prefix so stored artifacts are clearly
/// distinguishable from real executions.
pub struct SimulatedEngine;

impl EngineRunner for SimulatedEngine {
    #[instrument(skip_all, fields(script = %request.script_path.display()))]
    fn execute(&self, request: &ExecRequest, _cancel: &CancelToken) -> Result<ExecutionResult> {
        let started = Instant::now();
        let script = std::fs::read_to_string(&request.script_path)
            .with_context(|| format!("read script {}", request.script_path.display()))?;
        let name = request
            .script_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut stdout = format!(
            "[simulated] Running CAD macro {name}\n[simulated] engine started in headless mode\n"
        );
        if script.contains("raise") {
            debug!("simulated script contains explicit raise");
            return Ok(ExecutionResult {
                exit_code: Some(1),
                stdout,
                stderr: "[simulated] script error: explicit raise statement".to_string(),
                duration: started.elapsed(),
                timed_out: false,
                cancelled: false,
                simulated: true,
            });
        }
        stdout.push_str("[simulated] engine finished successfully\n");
        Ok(ExecutionResult {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            duration: started.elapsed(),
            timed_out: false,
            cancelled: false,
            simulated: true,
        })
    }
}

/// Build an engine runner from configuration.
pub fn create_engine(cfg: &EngineConfig) -> Box<dyn EngineRunner> {
    if cfg.command.is_empty() {
        info!("no engine command configured, using simulated engine");
        Box::new(SimulatedEngine)
    } else {
        Box::new(CommandEngine::new(cfg.command.clone(), cfg.headless))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(script_path: PathBuf) -> ExecRequest {
        ExecRequest {
            script_path,
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn simulated_engine_succeeds_on_plain_scripts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script_path = temp.path().join("script.py");
        std::fs::write(&script_path, "print('ok')").expect("write");

        let result = SimulatedEngine
            .execute(&request(script_path), &CancelToken::new())
            .expect("execute");
        assert_eq!(result.exit_code, Some(0));
        assert!(result.simulated);
        assert!(result.stdout.contains("[simulated]"));
    }

    #[test]
    fn simulated_engine_fails_on_raise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script_path = temp.path().join("script.py");
        std::fs::write(&script_path, "raise RuntimeError('no')").expect("write");

        let result = SimulatedEngine
            .execute(&request(script_path), &CancelToken::new())
            .expect("execute");
        assert_eq!(result.exit_code, Some(1));
        assert!(result.stderr.contains("explicit raise"));
    }

    #[test]
    fn command_engine_reports_missing_binary_as_infrastructure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script_path = temp.path().join("script.py");
        std::fs::write(&script_path, "print('ok')").expect("write");

        let engine = CommandEngine::new(vec!["definitely-not-a-cad-engine".to_string()], false);
        let err = engine
            .execute(&request(script_path), &CancelToken::new())
            .unwrap_err();
        assert!(err.downcast_ref::<InfrastructureError>().is_some());
    }

    #[test]
    fn command_engine_captures_exit_code_without_raising() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script_path = temp.path().join("script.py");
        std::fs::write(&script_path, "ignored").expect("write");

        // `false` ignores its argument and exits 1, standing in for an engine.
        let engine = CommandEngine::new(vec!["false".to_string()], false);
        let result = engine
            .execute(&request(script_path), &CancelToken::new())
            .expect("execute");
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.simulated);
    }
}
