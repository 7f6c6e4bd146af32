//! End-to-end loop scenarios against scripted collaborators.

use std::path::PathBuf;
use std::sync::Mutex;

use agent::cancel::CancelToken;
use agent::io::engine::{EngineRunner, ExecRequest, ExecutionResult, InfrastructureError};
use agent::llm::{ChatMessage, ModelClient, ProviderError};
use agent::pipeline::Pipeline;
use agent::report::{IterationOutcome, RunStatus, load_report};
use agent::test_support::{
    ScriptedEngine, ScriptedModelClient, default_script, failed_execution, fenced, stub_config,
    success_execution,
};

/// Execution fails twice with the same error, succeeds on the third attempt.
#[test]
fn retries_until_execution_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.max_iterations = 3;

    let client = ScriptedModelClient::always_script();
    let prompts = client.prompts();
    let engine = ScriptedEngine::with_results(vec![
        failed_execution("Error: Recompute failed"),
        failed_execution("Error: Recompute failed"),
    ]);
    let pipeline =
        Pipeline::with_collaborators(config, Box::new(client), Box::new(engine)).expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.iterations.len(), 3);
    assert_eq!(
        report
            .iterations
            .iter()
            .map(|record| record.outcome)
            .collect::<Vec<_>>(),
        vec![
            IterationOutcome::ExecutionError,
            IterationOutcome::ExecutionError,
            IterationOutcome::Success,
        ]
    );
    assert!(report.check_invariants(3).is_empty());

    // The generation prompt for iteration i > 0 embeds the error excerpt of
    // iteration i - 1; the first prompt references no prior failure.
    let prompts = prompts.lock().expect("prompts");
    let script_prompts: Vec<&String> = prompts
        .iter()
        .filter(|prompt| !prompt.contains("<render_review>"))
        .collect();
    assert_eq!(script_prompts.len(), 3);
    assert!(!script_prompts[0].contains("<failure>"));
    assert!(script_prompts[1].contains("<failure>"));
    assert!(script_prompts[1].contains("Error: Recompute failed"));
    assert!(script_prompts[2].contains("Error: Recompute failed"));
}

/// A permanently rate-limited provider exhausts every iteration without
/// aborting the run.
#[test]
fn rate_limit_exhaustion_is_not_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.max_iterations = 2;
    config.llm.max_retries = 2;

    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::always_rate_limited()),
        Box::new(ScriptedEngine::always_succeeds()),
    )
    .expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");

    assert_eq!(report.status, RunStatus::Exhausted);
    assert_eq!(report.iterations.len(), 2);
    for record in &report.iterations {
        assert_eq!(record.outcome, IterationOutcome::ScriptError);
        let excerpt = record.log_excerpt.as_deref().expect("excerpt");
        assert!(excerpt.contains("gave up after 2 attempts"), "{excerpt}");
    }
    assert!(report.check_invariants(2).is_empty());
}

/// Rejected credentials abort the run instead of burning the budget.
#[test]
fn auth_failure_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = stub_config(temp.path());

    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::with_responses(vec![Err(
            ProviderError::Auth("bad key".to_string()),
        )])),
        Box::new(ScriptedEngine::always_succeeds()),
    )
    .expect("pipeline");

    let err = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .unwrap_err();
    assert!(err.to_string().contains("authentication failed"));

    let report = load_report(&only_run_dir(temp.path()).join("report.json")).expect("report");
    assert_eq!(report.status, RunStatus::FatalError);
    assert!(report.iterations.is_empty());
}

/// A response without a fenced block counts as a script error and the loop
/// moves on.
#[test]
fn extraction_failure_advances_the_loop() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.max_iterations = 2;

    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::with_responses(vec![Ok(
            "I would rather describe the box in prose.".to_string(),
        )])),
        Box::new(ScriptedEngine::always_succeeds()),
    )
    .expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(report.iterations[0].outcome, IterationOutcome::ScriptError);
    assert_eq!(report.iterations[1].outcome, IterationOutcome::Success);
    assert!(report.iterations[0].script_path.is_none());
}

/// Cancellation mid-execution kills the step, appends nothing further, and
/// lands on the `cancelled` terminal status.
#[test]
fn cancellation_mid_execution_stops_the_run() {
    struct CancellingEngine;

    impl EngineRunner for CancellingEngine {
        fn execute(
            &self,
            _request: &ExecRequest,
            cancel: &CancelToken,
        ) -> anyhow::Result<ExecutionResult> {
            // Stand-in for a kill arriving while the subprocess blocks.
            cancel.cancel();
            let mut result = success_execution();
            result.cancelled = true;
            Ok(result)
        }
    }

    let temp = tempfile::tempdir().expect("tempdir");
    let config = stub_config(temp.path());
    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::always_script()),
        Box::new(CancellingEngine),
    )
    .expect("pipeline");

    let cancel = CancelToken::new();
    let report = pipeline.run("box 10x10x10", &cancel, |_| {}).expect("run");
    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.iterations.is_empty());
}

/// Cancelling from the observer stops the loop at the next boundary while
/// preserving completed iterations.
#[test]
fn cancellation_between_iterations_preserves_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.max_iterations = 5;

    let engine = ScriptedEngine::with_results(vec![
        failed_execution("Error: boom"),
        failed_execution("Error: boom"),
    ]);
    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::always_script()),
        Box::new(engine),
    )
    .expect("pipeline");

    let cancel = CancelToken::new();
    let observer_cancel = cancel.clone();
    let report = pipeline
        .run("box 10x10x10", &cancel, |_| observer_cancel.cancel())
        .expect("run");

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(
        report.iterations[0].outcome,
        IterationOutcome::ExecutionError
    );
}

/// A review that wants more views forces a fresh generation pass carrying
/// the verdict as feedback.
#[test]
fn review_rejection_regenerates_with_feedback() {
    struct PickyReviewer {
        reviews: Mutex<u32>,
        prompts: Mutex<Vec<String>>,
    }

    impl ModelClient for PickyReviewer {
        fn complete(
            &self,
            messages: &[ChatMessage],
            _images: &[PathBuf],
        ) -> Result<String, ProviderError> {
            let prompt: String = messages
                .iter()
                .map(|message| format!("{}: {}\n", message.role, message.content))
                .collect();
            self.prompts.lock().expect("prompts").push(prompt.clone());
            if prompt.contains("<render_review>") {
                let mut reviews = self.reviews.lock().expect("reviews");
                *reviews += 1;
                if *reviews == 1 {
                    return Ok(r#"{"acceptable": false, "needs_additional_views": true, "feedback": "show the back face"}"#.to_string());
                }
                return Ok(r#"{"acceptable": true, "feedback": "matches the brief"}"#.to_string());
            }
            Ok(fenced(&default_script()))
        }

        fn supports_images(&self) -> bool {
            true
        }
    }

    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.max_iterations = 3;

    let client = PickyReviewer {
        reviews: Mutex::new(0),
        prompts: Mutex::new(Vec::new()),
    };
    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(client),
        Box::new(ScriptedEngine::always_succeeds()),
    )
    .expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(
        report.iterations[0].outcome,
        IterationOutcome::NeedsMoreViews
    );
    assert_eq!(
        report.iterations[0].verdict.as_deref(),
        Some("show the back face")
    );
    assert_eq!(report.iterations[1].outcome, IterationOutcome::Success);
    assert_eq!(
        report.iterations[1].verdict.as_deref(),
        Some("matches the brief")
    );
    assert!(!report.iterations[0].render_paths.is_empty());
}

/// With review disabled, a clean execution is sufficient.
#[test]
fn clean_execution_succeeds_without_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.pipeline.review = false;

    let pipeline = Pipeline::with_collaborators(
        config,
        Box::new(ScriptedModelClient::always_script()),
        Box::new(ScriptedEngine::always_succeeds()),
    )
    .expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.iterations.len(), 1);
    assert!(report.iterations[0].verdict.is_none());
}

/// A missing engine binary aborts the run as an infrastructure failure, with
/// the report persisted for diagnosis.
#[test]
fn missing_engine_binary_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(temp.path());
    config.engine.command = vec!["definitely-not-a-cad-engine".to_string()];

    let pipeline = Pipeline::new(config).expect("pipeline");
    let err = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .unwrap_err();
    assert!(err.downcast_ref::<InfrastructureError>().is_some());

    let report = load_report(&only_run_dir(temp.path()).join("report.json")).expect("report");
    assert_eq!(report.status, RunStatus::FatalError);
    assert!(report.iterations.is_empty());
}

/// Full report JSON lands on disk and matches the in-memory value.
#[test]
fn report_is_persisted_to_the_run_directory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = stub_config(temp.path());
    let pipeline = Pipeline::new(config).expect("pipeline");

    let report = pipeline
        .run("box 10x10x10", &CancelToken::new(), |_| {})
        .expect("run");

    let loaded = load_report(&temp.path().join(&report.run_id).join("report.json")).expect("load");
    assert_eq!(loaded, report);
    assert_eq!(loaded.requirement, "box 10x10x10");
    for record in &loaded.iterations {
        for render in &record.render_paths {
            assert!(render.is_file(), "missing render {}", render.display());
        }
    }
}

fn only_run_dir(workspace: &std::path::Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(workspace)
        .expect("read workspace")
        .map(|entry| entry.expect("entry").path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one run dir");
    dirs.pop().expect("run dir")
}
