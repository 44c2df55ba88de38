//! `TextGenerator` over an Ollama-compatible `/api/generate` endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{GenerationOptions, TextGenerator};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1";

pub struct OllamaGenerator {
    endpoint: String,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let model = model.into();
        tracing::info!(endpoint = %endpoint, model = %model, "Creating OllamaGenerator");

        Ok(Self {
            endpoint,
            model,
            client,
        })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint)
    }
}

/// Pull the completion out of a non-streamed `/api/generate` body.
fn parse_generate_reply(body: &str) -> Result<String> {
    let reply: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        anyhow!("Unexpected reply from Ollama: {} ({})", e, preview)
    })?;
    match reply {
        GenerateResponse {
            error: Some(error), ..
        } => Err(anyhow!("Ollama error: {}", error)),
        GenerateResponse {
            response: Some(text),
            ..
        } => Ok(text),
        _ => Err(anyhow!("Ollama reply has no response field")),
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let endpoint = self.generate_url();
        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            max_tokens = options.max_tokens,
            prompt_len = prompt.len(),
            "Sending generate request"
        );

        let mut sampling = json!({
            "temperature": options.temperature,
            "num_predict": options.max_tokens,
        });
        if !options.stop_sequences.is_empty() {
            sampling["stop"] = json!(options.stop_sequences);
        }
        if let Some(seed) = options.seed {
            sampling["seed"] = json!(seed);
        }

        let request = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": sampling,
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::error!(endpoint = %endpoint, "Request timed out");
                    anyhow!("Request to {} timed out", endpoint)
                } else if e.is_connect() {
                    tracing::error!(endpoint = %endpoint, error = %e, "Connection failed");
                    anyhow!("Failed to connect to {}: {}", endpoint, e)
                } else {
                    anyhow!("Request to {} failed: {}", endpoint, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            tracing::error!(endpoint = %endpoint, status = %status, error = %error, "API returned error");
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
        let text = parse_generate_reply(&body)?;
        tracing::debug!(chars = text.len(), "Generate response received");
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
