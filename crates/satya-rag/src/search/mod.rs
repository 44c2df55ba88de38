pub mod hybrid;
pub mod text_search;
pub mod vector_index;

pub use hybrid::{reciprocal_rank_fusion, FusedHit, RankedList};
pub use text_search::TextSearch;
pub use vector_index::VectorIndex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ChunkRef;

/// Retrieval signal a ranked list was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Embedding similarity
    Dense,
    /// Term matching (BM25)
    Lexical,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense => f.write_str("dense"),
            Self::Lexical => f.write_str("lexical"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SearchQuery {
    Vector(Vec<f32>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: ChunkRef,
    pub score: f32,
}

impl SearchHit {
    pub fn new(chunk: ChunkRef, score: f32) -> Self {
        Self { chunk, score }
    }
}

/// Similarity search capability. Returns at most `k` hits, best first.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(
        &self,
        query: &SearchQuery,
        signal: SignalType,
        k: usize,
    ) -> Result<Vec<SearchHit>>;
}
