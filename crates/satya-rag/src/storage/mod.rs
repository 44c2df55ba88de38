pub mod corpus;
pub mod corpus_search;

pub use corpus::{Document, InMemoryCorpus, StoredChunk};
pub use corpus_search::CorpusSearch;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::ChunkRef;

/// Resolves a chunk reference back to its exact original text.
#[async_trait]
pub trait CorpusReader: Send + Sync {
    async fn chunk_text(&self, chunk: &ChunkRef) -> Result<String>;
}
