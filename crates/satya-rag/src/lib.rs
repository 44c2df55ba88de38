pub mod config;
pub mod embeddings;
pub mod error;
pub mod limits;
pub mod llm;
pub mod metrics;
pub mod processing;
pub mod rag;
pub mod rag_pipeline;
pub mod reranking;
pub mod search;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use rag_pipeline::{Capabilities, RAGPipeline};
pub use types::{
    ChunkRef, EvidenceSpan, FailureDetail, OffsetSpan, PipelineResponse, QueryRequest,
    RunDiagnostics, RunStatus, SourceRef, Stage, ValidationScore,
};

// Capability traits
pub use embeddings::TextEmbedder;
pub use llm::TextGenerator;
pub use search::SimilaritySearch;
pub use storage::CorpusReader;

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
