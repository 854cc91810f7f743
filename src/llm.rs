//! Generation provider for answer synthesis.
//!
//! Wraps the hosted Gemini `generateContent` endpoint behind a small client
//! with the same retry/backoff discipline as the embedding provider. The one
//! domain-specific wrinkle is safety handling: when the provider withholds a
//! completion (finish reason `SAFETY`) and returns no usable text, the client
//! substitutes a fixed apology marker instead of an empty string. Callers
//! detect that marker with [`is_safety_blocked`] and fall back to
//! deterministic, metadata-derived answers.

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;

/// Fixed message substituted when generation is withheld by safety filters.
/// Doubles as the marker the orchestration layer intercepts.
pub const SAFETY_BLOCK_MESSAGE: &str = "Response blocked by safety filters. Please rephrase the \
     question to be strictly factual about vendor invoice data.";

/// True when `text` is (or embeds) the safety-block marker.
pub fn is_safety_blocked(text: &str) -> bool {
    text.contains("blocked by safety filters")
}

pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.is_enabled() && std::env::var("GEMINI_API_KEY").is_err() {
            bail!("GEMINI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Generate an answer for a prompt, optionally prefixed by a system
    /// instruction. Errors when the provider is disabled or the API fails
    /// after retries; never returns an empty string on success.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        if !self.config.is_enabled() {
            bail!("LLM provider is disabled");
        }

        let full_prompt = match system {
            Some(system) => format!("System: {}\nUser: {}", system, prompt),
            None => prompt.to_string(),
        };

        self.call_gemini(&full_prompt).await
    }

    /// Lighter-weight single-shot call used for vendor disambiguation and
    /// narrative analytics summaries. Same safety contract as [`generate`].
    pub async fn quick(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        self.generate(prompt, system).await
    }

    async fn call_gemini(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY not set"))?;

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model, api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens,
            },
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return Ok(extract_text(&json));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Pull the answer text out of a `generateContent` response.
///
/// A candidate with finish reason `SAFETY` and no content parts means the
/// completion was withheld; the fixed marker message is returned so the
/// caller always gets non-empty text.
fn extract_text(response: &serde_json::Value) -> String {
    let candidates = response
        .get("candidates")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    for candidate in &candidates {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(|f| f.as_str())
            .unwrap_or("");
        let parts = candidate
            .pointer("/content/parts")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        if finish_reason == "SAFETY" && parts.is_empty() {
            warn!("generation withheld by safety filters");
            return SAFETY_BLOCK_MESSAGE.to_string();
        }
    }

    let mut texts: Vec<String> = Vec::new();
    for candidate in &candidates {
        if let Some(parts) = candidate.pointer("/content/parts").and_then(|p| p.as_array()) {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if !text.trim().is_empty() {
                        texts.push(text.trim().to_string());
                    }
                }
            }
        }
    }

    if texts.is_empty() {
        SAFETY_BLOCK_MESSAGE.to_string()
    } else {
        texts.join("\n")
    }
}
