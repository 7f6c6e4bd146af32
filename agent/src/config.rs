//! Agent configuration (TOML).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Complete agent configuration.
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; a missing file is
/// equivalent to `AppConfig::default()`. The value is immutable once a run
/// starts: the pipeline receives a snapshot, never a shared mutable handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    pub render: RenderConfig,
    pub pipeline: PipelineConfig,
}

/// Model provider selection and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// One of `stub`, `openai`, `openrouter`, `local`.
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Override the provider's default base URL.
    pub api_base: Option<String>,
    /// Endpoint URL for the `local` provider (required there, ignored elsewhere).
    pub endpoint: Option<String>,
    /// Extra request headers for the `local` provider.
    pub headers: BTreeMap<String, String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Whether the backend accepts image payloads alongside text.
    pub supports_images: bool,
    /// Per-attempt HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts for one completion call.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "stub".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_base: None,
            endpoint: None,
            headers: BTreeMap::new(),
            max_tokens: 2048,
            temperature: 0.1,
            supports_images: true,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// External CAD engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Command to execute (e.g. `["freecadcmd"]`); the script path is appended.
    /// Empty selects the deterministic simulated engine.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Export `QT_QPA_PLATFORM=offscreen` unless the caller already set it.
    pub headless: bool,
    /// Truncate captured engine stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Substrings that mark a failed execution even on exit code 0.
    pub error_markers: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 180,
            headless: true,
            output_limit_bytes: 100_000,
            error_markers: crate::core::classify::DEFAULT_ERROR_MARKERS
                .iter()
                .map(|marker| (*marker).to_string())
                .collect(),
        }
    }
}

/// Placeholder render settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    pub views: Vec<String>,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            views: ["isometric", "front", "right", "top"]
                .iter()
                .map(|view| (*view).to_string())
                .collect(),
            width: 1280,
            height: 720,
        }
    }
}

/// Settings that control the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for per-run artifact trees.
    pub workspace: PathBuf,
    pub max_iterations: u32,
    /// Ask the model to visually review renders before accepting a result.
    pub review: bool,
    /// Ask for extra projections once a prior iteration has failed.
    pub request_additional_views_on_failure: bool,
    /// Truncate failure excerpts fed back into prompts beyond this many bytes.
    pub error_excerpt_limit_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("artifacts"),
            max_iterations: 5,
            review: true,
            request_additional_views_on_failure: true,
            error_excerpt_limit_bytes: 4_000,
        }
    }
}

const KNOWN_PROVIDERS: &[&str] = &["stub", "openai", "openrouter", "local"];

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if !KNOWN_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(anyhow!(
                "llm.provider must be one of {KNOWN_PROVIDERS:?}, got {:?}",
                self.llm.provider
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.llm.max_retries == 0 {
            return Err(anyhow!("llm.max_retries must be > 0"));
        }
        if self.llm.retry_multiplier < 1.0 || !self.llm.retry_multiplier.is_finite() {
            return Err(anyhow!("llm.retry_multiplier must be >= 1.0"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(anyhow!("engine.timeout_secs must be > 0"));
        }
        if self.engine.output_limit_bytes == 0 {
            return Err(anyhow!("engine.output_limit_bytes must be > 0"));
        }
        if let Some(first) = self.engine.command.first()
            && first.trim().is_empty()
        {
            return Err(anyhow!("engine.command must not start with a blank entry"));
        }
        if self.render.views.is_empty() {
            return Err(anyhow!("render.views must not be empty"));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(anyhow!("render dimensions must be > 0"));
        }
        if self.pipeline.max_iterations == 0 {
            return Err(anyhow!("pipeline.max_iterations must be > 0"));
        }
        if self.pipeline.error_excerpt_limit_bytes == 0 {
            return Err(anyhow!("pipeline.error_excerpt_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
