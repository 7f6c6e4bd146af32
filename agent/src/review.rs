//! Model-based visual review of rendered results.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::core::verdict::{Verdict, parse_verdict};
use crate::io::render::RenderResult;
use crate::llm::retry::{RetryPolicy, complete_with_retry};
use crate::llm::{ModelClient, ProviderError};
use crate::prompt::review_messages;

/// Sends renders to the model for an acceptability verdict.
pub struct Reviewer<'a> {
    client: &'a dyn ModelClient,
    policy: RetryPolicy,
}

impl<'a> Reviewer<'a> {
    pub fn new(client: &'a dyn ModelClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Review one iteration's renders.
    ///
    /// Infallible by design: a failed review call must not fail a run that
    /// executed cleanly, so provider errors downgrade to an accepting verdict
    /// with the failure recorded as the verdict text. Cancellation is left to
    /// the orchestrator's boundary check.
    pub fn review(
        &self,
        requirement: &str,
        iteration: u32,
        renders: &[RenderResult],
        cancel: &CancelToken,
    ) -> Verdict {
        if renders.is_empty() {
            return Verdict::review_failed("no renders produced");
        }
        let views: Vec<String> = renders.iter().map(|render| render.view.clone()).collect();
        let images: Vec<PathBuf> = if self.client.supports_images() {
            renders
                .iter()
                .map(|render| render.image_path.clone())
                .collect()
        } else {
            Vec::new()
        };
        let messages = review_messages(requirement, iteration, &views);

        match complete_with_retry(self.client, &messages, &images, &self.policy, cancel) {
            Ok(response) => {
                let verdict = parse_verdict(&response);
                debug!(
                    acceptable = verdict.acceptable,
                    needs_additional_views = verdict.needs_additional_views,
                    "review verdict"
                );
                verdict
            }
            Err(ProviderError::Cancelled) => Verdict::review_failed("cancelled"),
            Err(err) => {
                warn!(err = %err, "render review failed");
                Verdict::review_failed(&err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use std::path::Path;

    struct CannedClient(String);

    impl ModelClient for CannedClient {
        fn complete(
            &self,
            _messages: &[ChatMessage],
            _images: &[PathBuf],
        ) -> Result<String, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct DeadClient;

    impl ModelClient for DeadClient {
        fn complete(
            &self,
            _messages: &[ChatMessage],
            _images: &[PathBuf],
        ) -> Result<String, ProviderError> {
            Err(ProviderError::Auth("no key".to_string()))
        }
    }

    fn renders() -> Vec<RenderResult> {
        vec![RenderResult {
            view: "front".to_string(),
            image_path: Path::new("renders/00_front.png").to_path_buf(),
        }]
    }

    #[test]
    fn acceptable_verdict_passes_through() {
        let client = CannedClient(r#"{"acceptable": true, "feedback": "fine"}"#.to_string());
        let reviewer = Reviewer::new(&client, RetryPolicy::default());
        let verdict = reviewer.review("box", 0, &renders(), &CancelToken::new());
        assert!(verdict.is_acceptable());
        assert_eq!(verdict.feedback, "fine");
    }

    #[test]
    fn review_failure_downgrades_to_accepting() {
        let reviewer = Reviewer::new(&DeadClient, RetryPolicy::default());
        let verdict = reviewer.review("box", 0, &renders(), &CancelToken::new());
        assert!(verdict.is_acceptable());
        assert!(verdict.feedback.contains("render review failed"));
    }

    #[test]
    fn missing_renders_do_not_fail_the_run() {
        let client = CannedClient("unused".to_string());
        let reviewer = Reviewer::new(&client, RetryPolicy::default());
        let verdict = reviewer.review("box", 0, &[], &CancelToken::new());
        assert!(verdict.is_acceptable());
        assert!(verdict.feedback.contains("no renders"));
    }
}
