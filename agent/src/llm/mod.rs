//! Model client abstraction over language-model backends.
//!
//! The [`ModelClient`] trait decouples prompt construction and review from
//! the transport. Network providers share one OpenAI-compatible HTTP client
//! ([`http`]); the deterministic [`stub`] backend keeps the loop runnable
//! offline and in tests. Selection happens in [`create_model_client`] from
//! configuration, never by runtime type inspection.

pub mod http;
pub mod retry;
pub mod stub;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::config::LlmConfig;

/// Single chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Provider failure, classified for the retry policy.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Backend asked us to slow down; retry after the given interval if any.
    RateLimited { retry_after: Option<Duration> },
    /// Per-attempt timeout elapsed.
    Timeout,
    /// Connection-level or 5xx failure.
    Transport(String),
    /// Response did not contain a completion.
    MalformedResponse(String),
    /// Credentials rejected. Not retryable.
    Auth(String),
    /// Backend rejected the request shape. Not retryable.
    InvalidRequest(String),
    /// Retry budget exhausted; wraps the last attempt's error.
    RetriesExhausted { attempts: u32, last: Box<ProviderError> },
    /// The caller cancelled the run while a call was pending.
    Cancelled,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout | Self::Transport(_)
        )
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after: Some(delay) } => {
                write!(f, "rate limited, retry after {delay:?}")
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Transport(detail) => write!(f, "transport error: {detail}"),
            Self::MalformedResponse(detail) => write!(f, "malformed response: {detail}"),
            Self::Auth(detail) => write!(f, "authentication failed: {detail}"),
            Self::InvalidRequest(detail) => write!(f, "invalid request: {detail}"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            Self::Cancelled => write!(f, "call cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Minimal capability interface all model backends implement.
pub trait ModelClient {
    /// Return a text completion for the conversation, optionally attaching
    /// images to the final user message.
    fn complete(
        &self,
        messages: &[ChatMessage],
        images: &[PathBuf],
    ) -> Result<String, ProviderError>;

    /// Whether the backend accepts image payloads.
    fn supports_images(&self) -> bool {
        false
    }
}

/// Build a model client from configuration.
pub fn create_model_client(cfg: &LlmConfig) -> Result<Box<dyn ModelClient>> {
    match cfg.provider.as_str() {
        "stub" => Ok(Box::new(stub::StubModelClient::default())),
        "openai" => {
            let key = cfg
                .api_key
                .as_deref()
                .ok_or_else(|| anyhow!("openai provider requires llm.api_key"))?;
            Ok(Box::new(http::HttpModelClient::openai(cfg, key)))
        }
        "openrouter" => {
            let key = cfg
                .api_key
                .as_deref()
                .ok_or_else(|| anyhow!("openrouter provider requires llm.api_key"))?;
            Ok(Box::new(http::HttpModelClient::openrouter(cfg, key)))
        }
        "local" => {
            let endpoint = cfg
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow!("local provider requires llm.endpoint"))?;
            Ok(Box::new(http::HttpModelClient::local(cfg, endpoint)))
        }
        other => Err(anyhow!("unknown llm provider {other:?}")),
    }
}
