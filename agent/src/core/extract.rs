//! Script extraction from model responses.
//!
//! The prompt instructs the model to return exactly one fenced `python`
//! block. Responses with several blocks are tolerated (first well-formed one
//! wins); responses with none are an [`ExtractionError`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// No runnable script found in a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionError {
    pub reason: String,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no script extracted: {}", self.reason)
    }
}

impl std::error::Error for ExtractionError {}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^```(?:python|py)?[ \t]*\r?\n(.*?)^```[ \t]*$").unwrap()
});

/// Extract the first well-formed fenced code block from `response`.
pub fn extract_script(response: &str) -> Result<String, ExtractionError> {
    let mut candidates: Vec<&str> = Vec::new();
    for caps in FENCE_RE.captures_iter(response) {
        if let Some(body) = caps.get(1) {
            let trimmed = body.as_str().trim();
            if !trimmed.is_empty() {
                candidates.push(trimmed);
            }
        }
    }
    match candidates.as_slice() {
        [] => Err(ExtractionError {
            reason: "response contains no fenced code block".to_string(),
        }),
        [only] => Ok((*only).to_string()),
        [first, rest @ ..] => {
            debug!(
                extra_blocks = rest.len(),
                "response contains multiple fenced blocks, using the first"
            );
            Ok((*first).to_string())
        }
    }
}
