//! Per-run artifact tree: scripts, execution logs, renders, report.
//!
//! Layout, one subdirectory per run to keep concurrent runs collision-free:
//!
//! ```text
//! <workspace>/<run_id>/
//!   report.json
//!   iterations/<index>/
//!     script.py
//!     execution.log
//!     renders/<index>_<view>.png
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

use crate::io::engine::{ExecutionResult, InfrastructureError};

/// Canonical paths for one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub report_path: PathBuf,
}

impl RunPaths {
    pub fn new(workspace: &Path, run_id: &str) -> Self {
        let run_dir = workspace.join(run_id);
        Self {
            report_path: run_dir.join("report.json"),
            run_dir,
        }
    }
}

/// Canonical paths for one iteration within a run.
#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub script_path: PathBuf,
    pub log_path: PathBuf,
    pub renders_dir: PathBuf,
}

impl IterationPaths {
    pub fn new(run_dir: &Path, index: u32) -> Self {
        let dir = run_dir.join("iterations").join(index.to_string());
        Self {
            script_path: dir.join("script.py"),
            log_path: dir.join("execution.log"),
            renders_dir: dir.join("renders"),
            dir,
        }
    }
}

/// Generate a collision-resistant run id: timestamp plus random suffix.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("run-{timestamp}-{}", suffix.to_lowercase())
}

/// Create the run directory. Failure means storage is unusable for the whole
/// run, so it surfaces as an [`InfrastructureError`].
pub fn create_run_dir(paths: &RunPaths) -> Result<()> {
    fs::create_dir_all(&paths.run_dir)
        .with_context(|| format!("create run dir {}", paths.run_dir.display()))
        .map_err(|err| {
            err.context(InfrastructureError {
                message: "run workspace is not writable".to_string(),
            })
        })
}

pub fn create_iteration_dir(paths: &IterationPaths) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))
        .map_err(|err| {
            err.context(InfrastructureError {
                message: "iteration directory is not writable".to_string(),
            })
        })
}

pub fn write_script(path: &Path, body: &str) -> Result<()> {
    let mut contents = body.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    fs::write(path, contents)
        .with_context(|| format!("write script {}", path.display()))
        .map_err(|err| {
            err.context(InfrastructureError {
                message: "script path is not writable".to_string(),
            })
        })
}

/// Write the captured execution log for one iteration.
///
/// Simulated executions are marked on the first line so stored artifacts are
/// clearly distinguishable from real engine output.
pub fn write_execution_log(path: &Path, result: &ExecutionResult, output_limit: usize) -> Result<()> {
    let mut buf = String::new();
    if result.simulated {
        buf.push_str("[simulated execution]\n");
    }
    buf.push_str("=== stdout ===\n");
    buf.push_str(&result.stdout);
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&result.stderr);
    if result.timed_out {
        buf.push_str("\n[engine timed out]\n");
    }
    if result.cancelled {
        buf.push_str("\n[execution cancelled]\n");
    }

    if buf.len() > output_limit {
        let mut cut = output_limit;
        while cut > 0 && !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut);
        return fs::write(path, truncated)
            .with_context(|| format!("write execution log {}", path.display()));
    }

    fs::write(path, buf).with_context(|| format!("write execution log {}", path.display()))
}
