//! Parsing of model render-review responses.

use serde_json::Value;

const DEFAULT_FEEDBACK: &str = "render review complete";

/// Model assessment of a rendered result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub acceptable: bool,
    pub needs_additional_views: bool,
    pub feedback: String,
}

impl Verdict {
    /// Verdict used when the review call itself failed: the run is accepted
    /// on the strength of its clean execution, with the failure recorded.
    pub fn review_failed(reason: &str) -> Self {
        Self {
            acceptable: true,
            needs_additional_views: false,
            feedback: format!("render review failed: {reason}"),
        }
    }

    pub fn is_acceptable(&self) -> bool {
        self.acceptable && !self.needs_additional_views
    }
}

/// Parse a review response.
///
/// Expected shape: `{"acceptable": bool, "needs_additional_views": bool,
/// "feedback": str}`. Responses that are not valid JSON fall back to a
/// substring heuristic over the raw text.
pub fn parse_verdict(response: &str) -> Verdict {
    if let Ok(value) = serde_json::from_str::<Value>(response) {
        let needs_more = value
            .get("needs_additional_views")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let acceptable = value
            .get("acceptable")
            .and_then(Value::as_bool)
            .unwrap_or(!needs_more);
        let feedback = value
            .get("feedback")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_FEEDBACK)
            .to_string();
        return Verdict {
            acceptable,
            needs_additional_views: needs_more,
            feedback,
        };
    }

    let lowered = response.to_lowercase();
    let needs_more = lowered.contains("additional") || lowered.contains("extra view");
    let trimmed = response.trim();
    Verdict {
        acceptable: !needs_more,
        needs_additional_views: needs_more,
        feedback: if trimmed.is_empty() {
            DEFAULT_FEEDBACK.to_string()
        } else {
            trimmed.to_string()
        },
    }
}
