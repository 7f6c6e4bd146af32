//! Deterministic prompt construction and script generation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::core::extract::extract_script;
use crate::llm::retry::{RetryPolicy, complete_with_retry};
use crate::llm::{ChatMessage, ModelClient};

const SCRIPT_TEMPLATE: &str = include_str!("prompts/script.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

const SCRIPT_SYSTEM_PROMPT: &str = "You are a FreeCAD automation expert. Generate executable \
     Python macros that follow FreeCAD API best practices and always call doc.recompute().";
const REVIEW_SYSTEM_PROMPT: &str = "You are a manufacturing inspector reviewing rendered CAD \
     previews. Respond with JSON containing 'acceptable', 'needs_additional_views' and 'feedback'.";

/// Feedback from the immediately preceding iteration, folded into the next
/// prompt. Ephemeral: rebuilt each iteration, never persisted.
#[derive(Debug, Clone, Default)]
pub struct PromptFeedback {
    /// Bounded failure excerpt (execution log tail or provider error).
    pub error_excerpt: Option<String>,
    /// Review feedback text, when the previous iteration was reviewed.
    pub verdict: Option<String>,
    /// Renders of the previous result, attached when the backend is multimodal.
    pub render_paths: Vec<PathBuf>,
    /// Ask the model for extra projections in the regenerated script.
    pub request_additional_views: bool,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("script", SCRIPT_TEMPLATE)
            .expect("script template should be valid");
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        Self { env }
    }

    fn render_script(
        &self,
        requirement: &str,
        feedback: Option<&PromptFeedback>,
        assembly: bool,
    ) -> Result<String> {
        let template = self.env.get_template("script")?;
        let renders: Vec<String> = feedback
            .map(|fb| {
                fb.render_paths
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let rendered = template.render(context! {
            requirement => requirement.trim(),
            environment => context! {
                version => "0.21",
                workbenches => "Part, Sketcher, TechDraw, Assembly4",
                notes => "Headless mode with automatic recompute",
            },
            failure => feedback.and_then(|fb| fb.error_excerpt.as_deref()).filter(|s| !s.is_empty()),
            verdict => feedback.and_then(|fb| fb.verdict.as_deref()).filter(|s| !s.is_empty()),
            renders => (!renders.is_empty()).then_some(renders),
            additional_views => feedback.is_some_and(|fb| fb.request_additional_views),
            assembly => assembly,
        })?;
        Ok(rendered)
    }

    fn render_review(&self, requirement: &str, iteration: u32, views: &[String]) -> Result<String> {
        let template = self.env.get_template("review")?;
        let rendered = template.render(context! {
            requirement => requirement.trim(),
            iteration => iteration,
            views => views.join(", "),
        })?;
        Ok(rendered)
    }
}

/// Build the review conversation for one iteration.
pub fn review_messages(requirement: &str, iteration: u32, views: &[String]) -> Vec<ChatMessage> {
    let engine = PromptEngine::new();
    let body = engine
        .render_review(requirement, iteration, views)
        .expect("review template rendering should not fail");
    vec![
        ChatMessage::system(REVIEW_SYSTEM_PROMPT),
        ChatMessage::user(body),
    ]
}

/// Whether the requirement references an assembly.
pub fn requires_assembly(requirement: &str) -> bool {
    let lowered = requirement.to_lowercase();
    ["assembly", "assemblies", "сборк"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Truncate `text` to at most `limit` bytes on a char boundary.
pub fn truncate_excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated]", &text[..cut])
}

/// Assembles per-iteration prompts and extracts the generated script.
pub struct ScriptBuilder<'a> {
    client: &'a dyn ModelClient,
    policy: RetryPolicy,
    excerpt_limit: usize,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(client: &'a dyn ModelClient, policy: RetryPolicy, excerpt_limit: usize) -> Self {
        Self {
            client,
            policy,
            excerpt_limit,
        }
    }

    /// Generate a script for one iteration.
    ///
    /// Fails with a `ProviderError` (retry budget exhausted, auth) or an
    /// `ExtractionError` (no fenced block in the response); the orchestrator
    /// maps both onto the iteration outcome.
    pub fn build(
        &self,
        requirement: &str,
        feedback: Option<&PromptFeedback>,
        cancel: &CancelToken,
    ) -> Result<String> {
        let engine = PromptEngine::new();
        let bounded = feedback.map(|fb| PromptFeedback {
            error_excerpt: fb
                .error_excerpt
                .as_deref()
                .map(|text| truncate_excerpt(text, self.excerpt_limit)),
            verdict: fb
                .verdict
                .as_deref()
                .map(|text| truncate_excerpt(text, self.excerpt_limit)),
            render_paths: fb.render_paths.clone(),
            request_additional_views: fb.request_additional_views,
        });
        let assembly = requires_assembly(requirement);
        let body = engine
            .render_script(requirement, bounded.as_ref(), assembly)
            .context("render script prompt")?;
        debug!(bytes = body.len(), assembly, "built script prompt");

        let messages = [
            ChatMessage::system(SCRIPT_SYSTEM_PROMPT),
            ChatMessage::user(body),
        ];
        let images: Vec<PathBuf> = if self.client.supports_images() {
            bounded
                .map(|fb| fb.render_paths)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let response = complete_with_retry(self.client, &messages, &images, &self.policy, cancel)?;
        let script = extract_script(&response)?;
        Ok(script)
    }
}
