//! Text-model contract and the OpenAI-compatible HTTP implementation.
//!
//! Every call site assumes the model is fallible: network errors and
//! malformed output are both surfaced as typed errors so the stages can
//! apply their own degradation policy (cleaner falls back per window,
//! extractor retries once with a stricter prompt, planner drops to rules).
//!
//! Retry strategy, as for the embedding provider:
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other 4xx → fail immediately (permanent)
//! - network error / timeout → retry

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ModelsConfig;
use crate::error::{LecternError, Result};

/// Completion contract for the cleaning, tagging, and planning models.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Model identifier used in logs and cost attribution.
    fn name(&self) -> &str;

    /// Complete a prompt. Implementations enforce their own per-call
    /// timeouts and bounded retries for transient failures.
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct HttpTextModel {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
    hard_timeout: Duration,
    max_retries: u32,
}

impl HttpTextModel {
    /// Build the client from config. The API key comes from the
    /// `OPENAI_API_KEY` environment variable, never from the config file.
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LecternError::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.soft_timeout_secs))
            .build()
            .map_err(|e| LecternError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            hard_timeout: Duration::from_secs(config.hard_timeout_secs),
            max_retries: config.max_retries,
        })
    }

    async fn call_once(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let send = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        // The client timeout is the soft limit; the outer timeout is the
        // hard stop for calls that stall mid-body.
        let response = match tokio::time::timeout(self.hard_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(LecternError::transient("text-model", e.to_string())),
            Err(_) => {
                return Err(LecternError::transient(
                    "text-model",
                    format!("hard timeout after {:?}", self.hard_timeout),
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(LecternError::transient(
                    "text-model",
                    format!("{status}: {body_text}"),
                ));
            }
            return Err(LecternError::permanent(
                "text-model",
                format!("{status}: {body_text}"),
            ));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LecternError::permanent("text-model", format!("bad body: {e}")))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                LecternError::permanent("text-model", "response missing message content")
            })
    }
}

#[async_trait]
impl TextModel for HttpTextModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying text-model call");
                tokio::time::sleep(delay).await;
            }

            match self.call_once(prompt, max_tokens, temperature).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| LecternError::transient("text-model", "retries exhausted")))
    }
}

/// Strip a fenced-code wrapper from a model response, if present, and trim
/// to the outermost JSON object. Extractors and the planner share this.
pub fn strip_json_wrapper(response: &str) -> &str {
    let mut text = response.trim();
    if text.starts_with("```") {
        // Drop the opening fence line and any trailing fence.
        if let Some(newline) = text.find('\n') {
            text = &text[newline + 1..];
        }
        if let Some(fence) = text.rfind("```") {
            text = &text[..fence];
        }
        text = text.trim();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_json() {
        let s = r#"{"a": 1}"#;
        assert_eq!(strip_json_wrapper(s), r#"{"a": 1}"#);
    }

    #[test]
    fn test_strip_fenced_json() {
        let s = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_json_wrapper(s), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_prose_around_json() {
        let s = "Here you go:\n{\"a\": 1}\nHope that helps!";
        assert_eq!(strip_json_wrapper(s), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_handles_no_json() {
        assert_eq!(strip_json_wrapper("not json at all"), "not json at all");
    }
}
