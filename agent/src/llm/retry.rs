//! Retry policy wrapping a single model completion call.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use super::{ChatMessage, ModelClient, ProviderError};
use crate::cancel::{CancelToken, sleep_cancellable};
use crate::config::LlmConfig;
use crate::core::backoff::RetrySchedule;

/// Retry budget for one completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub schedule: RetrySchedule,
}

impl RetryPolicy {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            schedule: RetrySchedule {
                base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
                multiplier: cfg.retry_multiplier,
                max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            schedule: RetrySchedule::default(),
        }
    }
}

/// Call `complete` with up to `policy.max_retries` attempts.
///
/// Rate limits honor the provider-supplied interval when present, otherwise
/// the exponential schedule. Non-retryable errors abort immediately without
/// consuming further attempts; an exhausted budget surfaces as
/// [`ProviderError::RetriesExhausted`] wrapping the last failure.
pub fn complete_with_retry(
    client: &dyn ModelClient,
    messages: &[ChatMessage],
    images: &[PathBuf],
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<String, ProviderError> {
    let mut last: Option<ProviderError> = None;
    for attempt in 0..policy.max_retries {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        match client.complete(messages, images) {
            Ok(text) => return Ok(text),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                let is_last = attempt + 1 == policy.max_retries;
                warn!(attempt, err = %err, "model call failed");
                if is_last {
                    return Err(ProviderError::RetriesExhausted {
                        attempts: policy.max_retries,
                        last: Box::new(err),
                    });
                }
                let delay = match &err {
                    ProviderError::RateLimited {
                        retry_after: Some(interval),
                    } => *interval,
                    _ => policy.schedule.delay_for(attempt),
                };
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                if !sleep_cancellable(delay, cancel) {
                    return Err(ProviderError::Cancelled);
                }
                last = Some(err);
            }
        }
    }
    // max_retries >= 1, so the loop always returns before falling through.
    Err(last.unwrap_or(ProviderError::Transport("no attempts made".to_string())))
}
