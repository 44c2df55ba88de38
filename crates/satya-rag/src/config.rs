use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::search::SignalType;
use crate::types::{Query, QueryRequest, RunOptions};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub expansion: ExpansionConfig,
    pub retrieval: RetrievalConfig,
    pub reranking: RerankingConfig,
    pub compression: CompressionConfig,
    pub generation: GenerationSettings,
    pub validation: ValidationConfig,
    pub correction: CorrectionConfig,
    pub concurrency: ConcurrencyConfig,
    pub run: RunConfig,
    pub chunking: ChunkingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub use_hyde: bool,
    /// Total variants including the original query.
    pub num_variations: usize,
    pub hyde_temperature: f32,
    pub hyde_max_tokens: usize,
    pub paraphrase_temperature: f32,
    pub paraphrase_max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub retrieval_k: usize,
    pub rrf_k: usize,
    pub signals: Vec<SignalType>,
    pub dense_weight: f32,
    pub lexical_weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankingConfig {
    pub rerank_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub max_sentences_per_chunk: usize,
    /// Sentences scoring below this are never kept.
    pub min_sentence_score: f32,
    /// Stop adding evidence once this many bytes are kept.
    pub max_total_chars: usize,
    /// A candidate reranked at or above this keeps its best sentence by
    /// rerank scorer even when no sentence shares a term with the query.
    pub rerank_keep_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    /// Extra tries after the first failed generate call.
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub acceptance_threshold: f32,
    /// Fraction of a claim's content terms that must appear in one span.
    pub claim_support_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub max_corrections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_embeddings: usize,
    pub max_concurrent_searches: usize,
    pub max_concurrent_generations: usize,
    pub embedding_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_ms: u64,
}

/// How documents are split before indexing. Sizes are in bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            use_hyde: true,
            num_variations: 3,
            hyde_temperature: 0.3,
            hyde_max_tokens: 300,
            paraphrase_temperature: 0.5,
            paraphrase_max_tokens: 64,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_k: 20,
            rrf_k: 60,
            signals: vec![SignalType::Dense, SignalType::Lexical],
            dense_weight: 1.0,
            lexical_weight: 1.0,
        }
    }
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self { rerank_k: 8 }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_sentences_per_chunk: 3,
            min_sentence_score: 0.2,
            max_total_chars: 6000,
            rerank_keep_threshold: 0.5,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.7,
            claim_support_threshold: 0.6,
        }
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self { max_corrections: 2 }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: 4,
            max_concurrent_searches: 8,
            max_concurrent_generations: 4,
            embedding_cache_size: 1000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { timeout_ms: 60_000 }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
            min_chunk_size: 50,
        }
    }
}

impl RetrievalConfig {
    pub fn weight_for(&self, signal: SignalType) -> f32 {
        match signal {
            SignalType::Dense => self.dense_weight,
            SignalType::Lexical => self.lexical_weight,
        }
    }
}

impl PipelineConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.expansion.num_variations == 0 {
            return Err("expansion.num_variations must be > 0".into());
        }
        if self.retrieval.retrieval_k == 0 {
            return Err("retrieval.retrieval_k must be > 0".into());
        }
        if self.retrieval.signals.is_empty() {
            return Err("retrieval.signals must name at least one signal".into());
        }
        if self.retrieval.dense_weight < 0.0 || self.retrieval.lexical_weight < 0.0 {
            return Err("retrieval signal weights must be >= 0".into());
        }
        if self.reranking.rerank_k == 0 {
            return Err("reranking.rerank_k must be > 0".into());
        }
        if self.reranking.rerank_k > self.retrieval.retrieval_k {
            return Err("reranking.rerank_k must be <= retrieval.retrieval_k".into());
        }
        if self.compression.max_sentences_per_chunk == 0 {
            return Err("compression.max_sentences_per_chunk must be > 0".into());
        }
        if !self.compression.rerank_keep_threshold.is_finite() {
            return Err("compression.rerank_keep_threshold must be a finite number".into());
        }
        if !(0.0..=1.0).contains(&self.validation.acceptance_threshold) {
            return Err("validation.acceptance_threshold must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.validation.claim_support_threshold) {
            return Err("validation.claim_support_threshold must be in [0.0, 1.0]".into());
        }
        let c = &self.concurrency;
        if c.max_concurrent_embeddings == 0
            || c.max_concurrent_searches == 0
            || c.max_concurrent_generations == 0
        {
            return Err("concurrency limits must be > 0".into());
        }
        if self.run.timeout_ms == 0 {
            return Err("run.timeout_ms must be > 0".into());
        }
        if self.chunking.chunk_size == 0 {
            return Err("chunking.chunk_size must be > 0".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunking.chunk_size".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// `$SATYA_CONFIG` if set, else `<config dir>/satya-rag/config.json` if it
    /// exists, else defaults.
    pub fn from_env_or_default() -> Result<Self, String> {
        if let Ok(path) = std::env::var("SATYA_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("satya-rag").join("config.json"))
    }

    /// Merge a request over the config defaults and check the result.
    pub fn resolve(&self, request: &QueryRequest) -> PipelineResult<Query> {
        let text = request.query.trim();
        if text.is_empty() {
            return Err(PipelineError::config("query must not be empty"));
        }

        let options = RunOptions {
            use_hyde: request.use_hyde.unwrap_or(self.expansion.use_hyde),
            num_variations: request
                .num_variations
                .unwrap_or(self.expansion.num_variations),
            retrieval_k: request.retrieval_k.unwrap_or(self.retrieval.retrieval_k),
            rerank_k: request.rerank_k.unwrap_or(self.reranking.rerank_k),
            max_corrections: request
                .max_corrections
                .unwrap_or(self.correction.max_corrections),
            timeout: Duration::from_millis(request.timeout_ms.unwrap_or(self.run.timeout_ms)),
        };

        if options.num_variations == 0 {
            return Err(PipelineError::config("num_variations must be > 0"));
        }
        if options.retrieval_k == 0 || options.rerank_k == 0 {
            return Err(PipelineError::config("retrieval_k and rerank_k must be > 0"));
        }
        if options.rerank_k > options.retrieval_k {
            return Err(PipelineError::config(format!(
                "rerank_k ({}) must be <= retrieval_k ({})",
                options.rerank_k, options.retrieval_k
            )));
        }
        if options.timeout.is_zero() {
            return Err(PipelineError::config("timeout_ms must be > 0"));
        }

        Ok(Query::new(text, options))
    }
}
