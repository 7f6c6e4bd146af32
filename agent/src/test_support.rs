//! Test-only scripted collaborators and config helpers.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::io::engine::{EngineRunner, ExecRequest, ExecutionResult};
use crate::llm::{ChatMessage, ModelClient, ProviderError};
use crate::pipeline::Pipeline;

/// Wrap a script body in the fence convention the extractor expects.
pub fn fenced(script: &str) -> String {
    format!("```python\n{script}\n```")
}

/// A plain script every scripted run can fall back to.
pub fn default_script() -> String {
    "import Part\ndoc_ok = True\nprint('Model generated successfully')".to_string()
}

/// Model client returning pre-programmed responses and recording prompts.
///
/// Once the queue is exhausted, every further call returns `fallback`.
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Result<String, ProviderError>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModelClient {
    pub fn with_responses(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: Ok(fenced(&default_script())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns an extractable script.
    pub fn always_script() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Always reports a rate limit, with no provider-supplied interval.
    pub fn always_rate_limited() -> Self {
        let mut client = Self::with_responses(Vec::new());
        client.fallback = Err(ProviderError::RateLimited { retry_after: None });
        client
    }

    /// Shared handle to every prompt this client has seen, in call order.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.prompts)
    }
}

impl ModelClient for ScriptedModelClient {
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
        // Review prompts are answered inline so queued responses only ever
        // feed script generation.
        if prompt.contains("<render_review>") {
            return Ok(r#"{"acceptable": true, "needs_additional_views": false, "feedback": "scripted review"}"#.to_string());
        }
        let mut responses = self.responses.lock().expect("responses");
        responses.pop_front().unwrap_or_else(|| self.fallback.clone())
    }

    fn supports_images(&self) -> bool {
        true
    }
}

/// Engine returning pre-programmed results without spawning processes.
///
/// Once the queue is exhausted, every further call succeeds.
pub struct ScriptedEngine {
    results: Mutex<VecDeque<ExecutionResult>>,
}

impl ScriptedEngine {
    pub fn with_results(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }

    pub fn always_succeeds() -> Self {
        Self::with_results(Vec::new())
    }
}

impl EngineRunner for ScriptedEngine {
    fn execute(&self, _request: &ExecRequest, _cancel: &CancelToken) -> Result<ExecutionResult> {
        let mut results = self.results.lock().expect("results");
        Ok(results.pop_front().unwrap_or_else(success_execution))
    }
}

pub fn success_execution() -> ExecutionResult {
    ExecutionResult {
        exit_code: Some(0),
        stdout: "Model generated successfully".to_string(),
        stderr: String::new(),
        duration: Duration::from_millis(10),
        timed_out: false,
        cancelled: false,
        simulated: false,
    }
}

pub fn failed_execution(stderr: &str) -> ExecutionResult {
    ExecutionResult {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(10),
        timed_out: false,
        cancelled: false,
        simulated: false,
    }
}

/// Default config rooted in `workspace`: stub provider, simulated engine,
/// instant retries, small deterministic renders.
pub fn stub_config(workspace: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.workspace = workspace.to_path_buf();
    config.llm.retry_base_delay_ms = 0;
    config.llm.retry_max_delay_ms = 0;
    config.render.width = 64;
    config.render.height = 48;
    config
}

/// Pipeline wired to scripted collaborators, plus the prompt log handle.
pub fn scripted_pipeline(
    workspace: &Path,
    model_responses: Vec<Result<String, ProviderError>>,
    engine_results: Vec<ExecutionResult>,
) -> (Pipeline, Arc<Mutex<Vec<String>>>) {
    let client = ScriptedModelClient::with_responses(model_responses);
    let prompts = client.prompts();
    let pipeline = Pipeline::with_collaborators(
        stub_config(workspace),
        Box::new(client),
        Box::new(ScriptedEngine::with_results(engine_results)),
    )
    .expect("valid test config");
    (pipeline, prompts)
}
