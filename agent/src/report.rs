//! Run report: the durable record of one orchestrated run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Exhausted,
    FatalError,
    Cancelled,
}

/// Derived outcome of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Success,
    ScriptError,
    ExecutionError,
    NeedsMoreViews,
}

/// One generate/execute/render/analyze cycle.
///
/// Records are appended by the orchestrator only after execution and
/// rendering have both completed for the index, fully formed; the outcome is
/// set exactly once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0-based, gapless, monotonically increasing within a run.
    pub index: u32,
    pub outcome: IterationOutcome,
    pub script_path: Option<PathBuf>,
    pub exit_code: Option<i32>,
    /// Bounded failure excerpt fed to the next prompt, if any.
    pub log_excerpt: Option<String>,
    pub render_paths: Vec<PathBuf>,
    /// Model review text, when visual review ran for this iteration.
    pub verdict: Option<String>,
    pub duration_ms: u64,
    /// True when the simulated engine produced this result.
    pub simulated: bool,
}

/// Final report for one run, persisted as `report.json` in the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub requirement: String,
    pub status: RunStatus,
    pub iterations: Vec<IterationRecord>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            requirement: requirement.into(),
            // Placeholder until the loop reaches a terminal state; every
            // persistence path overwrites it first.
            status: RunStatus::FatalError,
            iterations: Vec::new(),
        }
    }

    /// Check structural invariants, returning one message per violation.
    pub fn check_invariants(&self, max_iterations: u32) -> Vec<String> {
        let mut errors = Vec::new();
        if self.iterations.len() > max_iterations as usize {
            errors.push(format!(
                "{} iterations exceed max_iterations {max_iterations}",
                self.iterations.len()
            ));
        }
        for (position, record) in self.iterations.iter().enumerate() {
            if record.index as usize != position {
                errors.push(format!(
                    "iteration at position {position} has index {}",
                    record.index
                ));
            }
        }
        let success_indices: Vec<usize> = self
            .iterations
            .iter()
            .enumerate()
            .filter(|(_, record)| record.outcome == IterationOutcome::Success)
            .map(|(position, _)| position)
            .collect();
        match self.status {
            RunStatus::Succeeded => {
                let ends_with_only_success = self
                    .iterations
                    .len()
                    .checked_sub(1)
                    .is_some_and(|last| success_indices == [last]);
                if !ends_with_only_success {
                    errors.push("succeeded run must end with its only success".to_string());
                }
            }
            RunStatus::Exhausted => {
                if !success_indices.is_empty() {
                    errors.push("exhausted run must contain no success".to_string());
                }
                if self.iterations.len() != max_iterations as usize {
                    errors.push("exhausted run must use the full iteration budget".to_string());
                }
            }
            RunStatus::FatalError | RunStatus::Cancelled => {
                if !success_indices.is_empty() {
                    errors.push("aborted run must contain no success".to_string());
                }
            }
        }
        errors
    }
}

/// Atomically write the report (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize report")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("report path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    let report: RunReport = serde_json::from_str(&contents)
        .with_context(|| format!("parse report {}", path.display()))?;
    Ok(report)
}
