//! Text generation capability.
//!
//! The pipeline never talks to a model directly; it goes through
//! [`TextGenerator`], so any backend that can turn a prompt into text can be
//! plugged in.

pub mod ollama;

pub use ollama::OllamaGenerator;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sampling options passed with every generate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

impl GenerationOptions {
    pub fn new(max_tokens: usize, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            ..Self::default()
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.1,
            stop_sequences: vec![],
            seed: None,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion. Backend errors and backend-side timeouts both
    /// surface as `Err`.
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}
