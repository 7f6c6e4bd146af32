//! Iteration orchestrator: the generate, execute, render, analyze loop.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::core::classify::{Classification, LogClassifier};
use crate::core::extract::ExtractionError;
use crate::io::artifacts::{
    IterationPaths, RunPaths, create_iteration_dir, create_run_dir, generate_run_id, write_script,
    write_execution_log,
};
use crate::io::engine::{EngineRunner, ExecRequest, create_engine};
use crate::io::render::RenderProducer;
use crate::llm::retry::RetryPolicy;
use crate::llm::{ModelClient, ProviderError, create_model_client};
use crate::prompt::{PromptFeedback, ScriptBuilder, truncate_excerpt};
use crate::report::{IterationOutcome, IterationRecord, RunReport, RunStatus, write_report};
use crate::review::Reviewer;

/// Coordinates the model client, execution runner, and render producer for
/// one requirement at a time.
///
/// A `Pipeline` holds no per-run mutable state: concurrent runs are
/// independent values whose artifact trees are namespaced by run id.
pub struct Pipeline {
    config: AppConfig,
    client: Box<dyn ModelClient>,
    engine: Box<dyn EngineRunner>,
}

impl Pipeline {
    /// Build a pipeline with collaborators selected from configuration.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let client = create_model_client(&config.llm)?;
        let engine = create_engine(&config.engine);
        Ok(Self {
            config,
            client,
            engine,
        })
    }

    /// Build a pipeline around explicit collaborators (tests, front ends).
    pub fn with_collaborators(
        config: AppConfig,
        client: Box<dyn ModelClient>,
        engine: Box<dyn EngineRunner>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            engine,
        })
    }

    /// Drive one run to a terminal state.
    ///
    /// `on_iteration` fires after each iteration record is appended. Errors
    /// are returned only for infrastructure failures that abort the run; the
    /// report (including every completed iteration) is persisted to the run
    /// directory on every terminal path, fatal aborts included.
    #[instrument(skip_all, fields(requirement_bytes = requirement.len()))]
    pub fn run<F: FnMut(&IterationRecord)>(
        &self,
        requirement: &str,
        cancel: &CancelToken,
        mut on_iteration: F,
    ) -> Result<RunReport> {
        let run_id = generate_run_id();
        let paths = RunPaths::new(&self.config.pipeline.workspace, &run_id);
        create_run_dir(&paths)?;

        let mut report = RunReport::new(&run_id, requirement);
        if requirement.trim().is_empty() {
            report.status = RunStatus::FatalError;
            persist_best_effort(&paths, &report);
            return Err(anyhow!("requirement must not be empty"));
        }
        info!(run_id = %run_id, "run started");

        let policy = RetryPolicy::from_config(&self.config.llm);
        let excerpt_limit = self.config.pipeline.error_excerpt_limit_bytes;
        let builder = ScriptBuilder::new(self.client.as_ref(), policy, excerpt_limit);
        let reviewer = Reviewer::new(self.client.as_ref(), policy);
        let classifier = LogClassifier::new(self.config.engine.error_markers.clone());
        let renderer = RenderProducer::from_config(&self.config.render);
        let exec_timeout = Duration::from_secs(self.config.engine.timeout_secs);
        let output_limit = self.config.engine.output_limit_bytes;

        let mut feedback: Option<PromptFeedback> = None;
        let mut terminal: Option<RunStatus> = None;

        for index in 0..self.config.pipeline.max_iterations {
            if cancel.is_cancelled() {
                terminal = Some(RunStatus::Cancelled);
                break;
            }
            let started = Instant::now();
            info!(index, "starting iteration");
            let iter_paths = IterationPaths::new(&paths.run_dir, index);
            if let Err(err) = create_iteration_dir(&iter_paths) {
                return abort(report, &paths, err);
            }

            let script = match builder.build(requirement, feedback.as_ref(), cancel) {
                Ok(script) => script,
                Err(err) => {
                    if is_cancellation(&err) || cancel.is_cancelled() {
                        terminal = Some(RunStatus::Cancelled);
                        break;
                    }
                    if is_fatal_generation_error(&err) {
                        return abort(report, &paths, err);
                    }
                    let excerpt =
                        truncate_excerpt(&format!("script generation failed: {err:#}"), excerpt_limit);
                    warn!(index, err = %err, "iteration failed before execution");
                    feedback = Some(PromptFeedback {
                        error_excerpt: Some(excerpt.clone()),
                        ..PromptFeedback::default()
                    });
                    report.iterations.push(IterationRecord {
                        index,
                        outcome: IterationOutcome::ScriptError,
                        script_path: None,
                        exit_code: None,
                        log_excerpt: Some(excerpt),
                        render_paths: Vec::new(),
                        verdict: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        simulated: false,
                    });
                    on_iteration(report.iterations.last().expect("just pushed"));
                    continue;
                }
            };
            if let Err(err) = write_script(&iter_paths.script_path, &script) {
                return abort(report, &paths, err);
            }
            if cancel.is_cancelled() {
                terminal = Some(RunStatus::Cancelled);
                break;
            }

            let exec_request = ExecRequest {
                script_path: iter_paths.script_path.clone(),
                timeout: exec_timeout,
                output_limit_bytes: output_limit,
            };
            let execution = match self.engine.execute(&exec_request, cancel) {
                Ok(result) => result,
                Err(err) => return abort(report, &paths, err),
            };
            if let Err(err) = write_execution_log(&iter_paths.log_path, &execution, output_limit) {
                return abort(report, &paths, err);
            }
            if execution.cancelled || cancel.is_cancelled() {
                terminal = Some(RunStatus::Cancelled);
                break;
            }

            let log = execution.combined_log();
            if let Classification::Failed { reason, excerpt } =
                classifier.classify(execution.exit_code, execution.timed_out, &log)
            {
                let excerpt = truncate_excerpt(&format!("{reason}\n{excerpt}"), excerpt_limit);
                warn!(index, reason = %reason, "execution failed");
                feedback = Some(PromptFeedback {
                    error_excerpt: Some(excerpt.clone()),
                    request_additional_views: self
                        .config
                        .pipeline
                        .request_additional_views_on_failure,
                    ..PromptFeedback::default()
                });
                report.iterations.push(IterationRecord {
                    index,
                    outcome: IterationOutcome::ExecutionError,
                    script_path: Some(iter_paths.script_path.clone()),
                    exit_code: execution.exit_code,
                    log_excerpt: Some(excerpt),
                    render_paths: Vec::new(),
                    verdict: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                    simulated: execution.simulated,
                });
                on_iteration(report.iterations.last().expect("just pushed"));
                continue;
            }

            let renders = renderer.render(None, index, &iter_paths.renders_dir);
            let render_paths: Vec<PathBuf> = renders
                .iter()
                .map(|render| render.image_path.clone())
                .collect();

            let verdict = self
                .config
                .pipeline
                .review
                .then(|| reviewer.review(requirement, index, &renders, cancel));
            if cancel.is_cancelled() {
                terminal = Some(RunStatus::Cancelled);
                break;
            }

            match verdict {
                Some(verdict) if !verdict.is_acceptable() => {
                    info!(index, "review requested changes, regenerating");
                    feedback = Some(PromptFeedback {
                        verdict: Some(verdict.feedback.clone()),
                        render_paths: render_paths.clone(),
                        request_additional_views: verdict.needs_additional_views,
                        ..PromptFeedback::default()
                    });
                    report.iterations.push(IterationRecord {
                        index,
                        outcome: IterationOutcome::NeedsMoreViews,
                        script_path: Some(iter_paths.script_path.clone()),
                        exit_code: execution.exit_code,
                        log_excerpt: None,
                        render_paths,
                        verdict: Some(verdict.feedback),
                        duration_ms: started.elapsed().as_millis() as u64,
                        simulated: execution.simulated,
                    });
                    on_iteration(report.iterations.last().expect("just pushed"));
                }
                verdict => {
                    info!(index, "iteration succeeded");
                    report.iterations.push(IterationRecord {
                        index,
                        outcome: IterationOutcome::Success,
                        script_path: Some(iter_paths.script_path.clone()),
                        exit_code: execution.exit_code,
                        log_excerpt: None,
                        render_paths,
                        verdict: verdict.map(|v| v.feedback),
                        duration_ms: started.elapsed().as_millis() as u64,
                        simulated: execution.simulated,
                    });
                    on_iteration(report.iterations.last().expect("just pushed"));
                    terminal = Some(RunStatus::Succeeded);
                    break;
                }
            }
        }

        report.status = terminal.unwrap_or(RunStatus::Exhausted);
        write_report(&paths.report_path, &report)?;
        info!(
            run_id = %report.run_id,
            status = ?report.status,
            iterations = report.iterations.len(),
            "run finished"
        );
        Ok(report)
    }
}

/// Persist what we have and propagate the fatal error.
fn abort(mut report: RunReport, paths: &RunPaths, err: anyhow::Error) -> Result<RunReport> {
    report.status = RunStatus::FatalError;
    persist_best_effort(paths, &report);
    Err(err)
}

fn persist_best_effort(paths: &RunPaths, report: &RunReport) {
    if let Err(persist_err) = write_report(&paths.report_path, report) {
        warn!(err = %persist_err, "could not persist report during abort");
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::Cancelled)
    )
}

/// Script generation failures that no later iteration can recover from.
///
/// Retry exhaustion and extraction failures are ordinary iteration outcomes;
/// rejected credentials or requests, and unexpected internal errors, are not.
fn is_fatal_generation_error(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<ProviderError>() {
        Some(ProviderError::Auth(_) | ProviderError::InvalidRequest(_)) => true,
        Some(_) => false,
        None => err.downcast_ref::<ExtractionError>().is_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::load_report;
    use crate::test_support::{scripted_pipeline, stub_config};

    #[test]
    fn empty_requirement_aborts_before_any_iteration() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = stub_config(temp.path());
        let pipeline = Pipeline::new(config).expect("pipeline");

        let err = pipeline
            .run("   ", &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));

        // The fatal report is still persisted, with zero iterations.
        let run_dir = std::fs::read_dir(temp.path())
            .expect("read workspace")
            .next()
            .expect("run dir")
            .expect("entry")
            .path();
        let report = load_report(&run_dir.join("report.json")).expect("report");
        assert_eq!(report.status, RunStatus::FatalError);
        assert!(report.iterations.is_empty());
    }

    #[test]
    fn stub_run_succeeds_first_iteration() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = stub_config(temp.path());
        let pipeline = Pipeline::new(config).expect("pipeline");

        let mut seen = 0u32;
        let report = pipeline
            .run("box 10x10x10", &CancelToken::new(), |_| seen += 1)
            .expect("run");
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.iterations.len(), 1);
        assert_eq!(seen, 1);
        let record = &report.iterations[0];
        assert_eq!(record.outcome, IterationOutcome::Success);
        assert!(record.simulated);
        assert_eq!(record.render_paths.len(), 4);
        assert!(record.script_path.as_ref().expect("script").is_file());
    }

    #[test]
    fn cancelled_before_start_appends_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = stub_config(temp.path());
        let pipeline = Pipeline::new(config).expect("pipeline");

        let cancel = CancelToken::new();
        cancel.cancel();
        let report = pipeline.run("box", &cancel, |_| {}).expect("run");
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.iterations.is_empty());
    }

    #[test]
    fn scripted_collaborators_are_accepted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (pipeline, _prompts) = scripted_pipeline(temp.path(), Vec::new(), Vec::new());
        let err = pipeline.run("", &CancelToken::new(), |_| {}).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
