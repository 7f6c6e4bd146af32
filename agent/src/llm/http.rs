//! Blocking OpenAI-compatible chat-completions client.
//!
//! `openai`, `openrouter`, and `local` providers share this wire format and
//! differ only in base URL and headers. Images are attached to the last user
//! message as base64 data URLs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ChatMessage, ModelClient, ProviderError};
use crate::config::LlmConfig;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const COMPLETIONS_PATH: &str = "/chat/completions";

pub struct HttpModelClient {
    base_url: String,
    headers: Vec<(String, String)>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    supports_images: bool,
}

impl HttpModelClient {
    pub fn openai(cfg: &LlmConfig, api_key: &str) -> Self {
        Self::new(
            cfg,
            cfg.api_base.as_deref().unwrap_or(OPENAI_API_BASE),
            vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
        )
    }

    pub fn openrouter(cfg: &LlmConfig, api_key: &str) -> Self {
        Self::new(
            cfg,
            cfg.api_base.as_deref().unwrap_or(OPENROUTER_API_BASE),
            vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
        )
    }

    pub fn local(cfg: &LlmConfig, endpoint: &str) -> Self {
        let headers = cfg
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self::new(cfg, endpoint, headers)
    }

    fn new(cfg: &LlmConfig, base_url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            timeout: Duration::from_secs(cfg.timeout_secs),
            supports_images: cfg.supports_images,
        }
    }

    fn payload(&self, messages: &[ChatMessage], images: &[PathBuf]) -> Value {
        let mut rendered: Vec<Value> = messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role,
                    "content": [{"type": "text", "text": message.content}],
                })
            })
            .collect();

        if self.supports_images && !images.is_empty() {
            let encoded = encode_images(images);
            if !encoded.is_empty() {
                if rendered
                    .last()
                    .and_then(|message| message.get("role"))
                    .and_then(Value::as_str)
                    != Some("user")
                {
                    rendered.push(json!({"role": "user", "content": []}));
                }
                let last = rendered.last_mut().expect("at least one message");
                let content = last
                    .get_mut("content")
                    .and_then(Value::as_array_mut)
                    .expect("content array");
                content.extend(encoded);
            }
        }

        json!({
            "model": self.model,
            "messages": rendered,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        })
    }
}

impl ModelClient for HttpModelClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        images: &[PathBuf],
    ) -> Result<String, ProviderError> {
        let url = format!("{}{COMPLETIONS_PATH}", self.base_url);
        let mut request = ureq::post(&url).timeout(self.timeout);
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }

        debug!(model = %self.model, images = images.len(), "sending completion request");
        let response = request.send_json(self.payload(messages, images));

        match response {
            Ok(resp) => {
                let body: Value = resp
                    .into_json()
                    .map_err(|err| ProviderError::MalformedResponse(err.to_string()))?;
                extract_completion(&body)
            }
            Err(ureq::Error::Status(429, resp)) => Err(ProviderError::RateLimited {
                retry_after: resp
                    .header("retry-after")
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
            }),
            Err(ureq::Error::Status(code @ (401 | 403), resp)) => Err(ProviderError::Auth(
                format!("http {code}: {}", resp.into_string().unwrap_or_default()),
            )),
            Err(ureq::Error::Status(code @ (400 | 404 | 422), resp)) => {
                Err(ProviderError::InvalidRequest(format!(
                    "http {code}: {}",
                    resp.into_string().unwrap_or_default()
                )))
            }
            Err(ureq::Error::Status(code, resp)) => Err(ProviderError::Transport(format!(
                "http {code}: {}",
                resp.into_string().unwrap_or_default()
            ))),
            Err(ureq::Error::Transport(transport)) => {
                let detail = transport.to_string();
                if detail.contains("timed out") || detail.contains("timeout") {
                    Err(ProviderError::Timeout)
                } else {
                    Err(ProviderError::Transport(detail))
                }
            }
        }
    }

    fn supports_images(&self) -> bool {
        self.supports_images
    }
}

/// Pull `choices[0].message.content` out of a completion response.
///
/// Content may be a plain string or an array of `{type: "text", text}` parts.
fn extract_completion(body: &Value) -> Result<String, ProviderError> {
    let content = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| ProviderError::MalformedResponse(format!("missing content: {body}")))?;

    let text = match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string(),
        other => {
            return Err(ProviderError::MalformedResponse(format!(
                "unexpected content shape: {other}"
            )));
        }
    };
    if text.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "empty completion".to_string(),
        ));
    }
    Ok(text)
}

fn encode_images(images: &[PathBuf]) -> Vec<Value> {
    let mut encoded = Vec::new();
    for path in images {
        match std::fs::read(path) {
            Ok(bytes) => {
                let data = BASE64.encode(bytes);
                let mime = guess_mime(path);
                encoded.push(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{mime};base64,{data}")},
                }));
            }
            Err(err) => {
                warn!(path = %path.display(), err = %err, "render image missing, skipping");
            }
        }
    }
    encoded
}

fn guess_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}
