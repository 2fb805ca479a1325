//! Text-generation provider chain
//!
//! Every provider speaks the OpenAI chat-completions dialect, so one HTTP
//! implementation parameterized by base URL covers them all. The engine holds
//! a priority-ordered list built from the configured keys (groq first for
//! latency, then deepseek, gemini, openrouter) and gives each provider one
//! attempt per request before moving on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ProvidersConfig;
use crate::error::{ProviderError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
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

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub tokens_used: i64,
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResult>;
}

/// One OpenAI-compatible endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(name: &str, base_url: &str, api_key: &str, default_model: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<i64>,
}

#[async_trait]
impl TextProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let attempt = |reason: String| ProviderError::Attempt {
            provider: self.name.clone(),
            reason,
        };

        let request = ChatRequest {
            model,
            messages,
            temperature: options.temperature.unwrap_or(0.7),
            max_tokens: options.max_tokens.unwrap_or(2048),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| attempt(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(attempt(format!("HTTP {}: {}", status, truncate(&body, 200))).into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| attempt(format!("bad response body: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| attempt("empty completion".to_string()))?;

        Ok(GenerationResult {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider: self.name.clone(),
            tokens_used: parsed
                .usage
                .and_then(|u| u.total_tokens)
                .unwrap_or_default(),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The fallback orchestrator. Providers are tried strictly in order; the
/// first success wins and a full sweep of failures surfaces every provider's
/// reason in one error.
pub struct TextEngine {
    providers: Vec<Box<dyn TextProvider>>,
}

impl TextEngine {
    /// Build the chain from configured keys, priority order fixed.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut providers: Vec<Box<dyn TextProvider>> = Vec::new();

        if let Some(key) = &config.groq_api_key {
            providers.push(Box::new(OpenAiCompatProvider::new(
                "groq",
                "https://api.groq.com/openai/v1",
                key,
                "llama-3.3-70b-versatile",
            )));
        }
        if let Some(key) = &config.deepseek_api_key {
            providers.push(Box::new(OpenAiCompatProvider::new(
                "deepseek",
                "https://api.deepseek.com/v1",
                key,
                "deepseek-chat",
            )));
        }
        if let Some(key) = &config.gemini_api_key {
            providers.push(Box::new(OpenAiCompatProvider::new(
                "gemini",
                "https://generativelanguage.googleapis.com/v1beta/openai",
                key,
                "gemini-2.5-flash",
            )));
        }
        if let Some(key) = &config.openrouter_api_key {
            providers.push(Box::new(OpenAiCompatProvider::new(
                "openrouter",
                "https://openrouter.ai/api/v1",
                key,
                "meta-llama/llama-3.3-70b-instruct:free",
            )));
        }

        Self { providers }
    }

    /// Assemble from explicit providers (tests, custom chains).
    pub fn with_providers(providers: Vec<Box<dyn TextProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run the chain. Each provider gets exactly one attempt.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResult> {
        if self.providers.is_empty() {
            return Err(ProviderError::NoneConfigured(
                "no text providers configured; set at least one provider API key".to_string(),
            )
            .into());
        }

        let mut attempts: Vec<(String, String)> = Vec::new();

        for provider in &self.providers {
            match provider.chat(messages, options).await {
                Ok(result) => {
                    tracing::debug!(
                        provider = provider.name(),
                        model = %result.model,
                        tokens = result.tokens_used,
                        "text generation succeeded"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "text provider failed, trying next"
                    );
                    attempts.push((provider.name().to_string(), e.to_string()));
                }
            }
        }

        Err(ProviderError::exhausted(&attempts).into())
    }
}
