//! The LLM chat/completion endpoint (spec.md §1 "out of scope external
//! collaborator", §9 "dynamic dispatch on engines"). This crate supplies
//! only the client side of that boundary: a small polymorphic trait plus
//! two concrete implementations the planner's quick-responder and main
//! loop can swap between (spec.md's `LLM_PROVIDER`/`QUICK_RESPONSE_MODEL`
//! knobs), matching the teacher's `LlmRouter` shape generalized from two
//! hardcoded clients to one trait object.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use sentinel_config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A completed exchange with the model: the text plus whatever token
/// accounting the API reported (planner records this to the cost guard,
/// spec.md §4.7 step 7).
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Polymorphic over `{complete(system, user) -> LlmResponse}`, per spec.md
/// §9's "dynamic dispatch on engines" note (the same shape it asks for STT
/// and TTS). Concrete impls: a local Ollama HTTP client and an
/// OpenAI-compatible remote client (OpenRouter, or any `OPENAI_API_KEY`
/// compatible endpoint).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str, model: &str) -> Result<LlmResponse, LlmError>;
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, temperature: f32, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, system: &str, user: &str, model: &str) -> Result<LlmResponse, LlmError> {
        let body = json!({
            "model": model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Transport(format!("ollama returned {}", response.status())));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let text = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::Malformed("missing message.content".to_string()))?
            .to_string();

        let input_tokens = value.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = value.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

/// OpenAI-compatible chat-completions client, used for OpenRouter and for
/// the `QUICK_RESPONSE_MODEL` quick-answer path (spec.md §4.6).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, temperature: f32, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, system: &str, user: &str, model: &str) -> Result<LlmResponse, LlmError> {
        let body = json!({
            "model": model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(LlmError::Transport(format!("{status}: {message}")));
        }

        let text = value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))?
            .to_string();

        let input_tokens = value
            .get("usage")
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = value
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(LlmResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }
}

/// Picks the configured provider, matching `LlmConfig::provider`
/// (`"ollama"` or `"openrouter"`/anything else).
pub fn client_for(config: &LlmConfig) -> Box<dyn LlmClient> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    if config.provider.eq_ignore_ascii_case("ollama") {
        Box::new(OllamaClient::new(&config.ollama_base_url, config.temperature, timeout))
    } else {
        Box::new(OpenAiCompatibleClient::new(
            &config.openrouter_base_url,
            &config.api_key,
            config.temperature,
            config.max_tokens,
            timeout,
        ))
    }
}

/// Strips a leading/trailing ``` fenced block (with optional `json`
/// language tag), matching spec.md §4.7 step 5 "tolerating triple-backtick
/// fences".
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
