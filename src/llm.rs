//! Language model runtimes.
//!
//! Implements [`LanguageModel`] over HTTP:
//! - **[`OllamaModel`]**: calls a local Ollama instance's `/api/chat` endpoint.
//! - **[`OpenAIModel`]**: calls an OpenAI-compatible `/v1/chat/completions` endpoint.
//!
//! Use [`create_model`] to instantiate the backend named in `[agent]`.
//!
//! Both backends ask for JSON-formatted replies (`format: "json"` for Ollama,
//! `response_format: json_object` for OpenAI), since the agent expects one
//! JSON object per turn.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::traits::{ChatMessage, LanguageModel};

/// Instantiate the configured model backend.
///
/// # Errors
///
/// Returns an error for unknown provider names, or when the OpenAI backend
/// is selected without `OPENAI_API_KEY`.
pub fn create_model(config: &AgentConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        other => bail!("Unknown agent provider: {}", other),
    }
}

fn build_client(config: &AgentConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    Ok(builder.build()?)
}

// ============ Ollama ============

/// Chat model served by Ollama.
///
/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull llama3`).
pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: config.base_url().to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "format": "json",
            "options": { "temperature": self.temperature },
        });

        let request = self
            .client
            .post(format!("{}/api/chat", self.url))
            .header("Content-Type", "application/json")
            .json(&body);

        let json = send_with_retry(request, self.max_retries, "Ollama", &self.url).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

// ============ OpenAI ============

/// Chat model served by an OpenAI-compatible API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIModel {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIModel {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: build_client(config)?,
            url: config.base_url().to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
        });

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);

        let json = send_with_retry(request, self.max_retries, "OpenAI", &self.url).await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Shared transport ============

/// Send `request`, retrying transient failures with exponential backoff.
async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
    url: &str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} retry", label);
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            bail!("{} request body cannot be retried", label);
        };

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): fail now
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!(
                    "{} connection error (is it running at {}?): {}",
                    label,
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ollama_content_extracted() {
        let json = json!({"model": "llama3", "message": {"role": "assistant", "content": "{\"a\":1}"}, "done": true});
        assert_eq!(parse_ollama_response(&json).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn ollama_missing_content_is_error() {
        assert!(parse_ollama_response(&json!({"error": "model 'llama3' not found"})).is_err());
    }

    #[test]
    fn openai_content_extracted() {
        let json = json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(parse_openai_response(&json).unwrap(), "hi");
    }

    #[test]
    fn openai_empty_choices_is_error() {
        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn ollama_is_default_backend() {
        let model = create_model(&AgentConfig::default()).unwrap();
        assert_eq!(model.model_name(), "llama3");
    }
}
