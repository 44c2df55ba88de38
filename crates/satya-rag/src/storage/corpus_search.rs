//! Dense + lexical search over an `InMemoryCorpus`.

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::InMemoryCorpus;
use crate::embeddings::TextEmbedder;
use crate::search::{SearchHit, SearchQuery, SignalType, SimilaritySearch, TextSearch, VectorIndex};

pub struct CorpusSearch {
    vectors: VectorIndex,
    text: TextSearch,
}

impl CorpusSearch {
    /// Embed and index every chunk of `corpus`.
    pub async fn build(corpus: &InMemoryCorpus, embedder: &dyn TextEmbedder) -> Result<Self> {
        let mut vectors = VectorIndex::new();
        let text = TextSearch::in_memory()?;

        for stored in corpus.chunks() {
            let chunk_text = corpus.slice(&stored.chunk)?;
            let title = corpus
                .document(&stored.chunk.corpus_id)
                .map(|d| d.title.as_str())
                .unwrap_or_default();
            let title = match &stored.heading {
                Some(heading) => format!("{} {}", title, heading),
                None => title.to_string(),
            };

            let embedding = embedder.embed(chunk_text).await?;
            vectors.insert(stored.chunk.clone(), embedding);
            text.index_chunk(&stored.chunk, chunk_text, &title)?;
        }
        text.commit()?;

        tracing::info!(
            chunks = vectors.len(),
            dimension = embedder.dimension(),
            "Corpus search indexes built"
        );
        Ok(Self { vectors, text })
    }
}

#[async_trait]
impl SimilaritySearch for CorpusSearch {
    async fn search(
        &self,
        query: &SearchQuery,
        signal: SignalType,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        match (signal, query) {
            (SignalType::Dense, SearchQuery::Vector(vector)) => Ok(self.vectors.search(vector, k)),
            (SignalType::Lexical, SearchQuery::Text(text)) => self.text.search(text, k),
            (SignalType::Dense, SearchQuery::Text(_)) => {
                bail!("dense search needs an embedded query")
            }
            (SignalType::Lexical, SearchQuery::Vector(_)) => {
                bail!("lexical search needs query text")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;

    #[tokio::test]
    async fn test_both_signals_prefer_matching_chunk() {
        let mut corpus = InMemoryCorpus::default();
        corpus
            .add_document("a", "auth", "Module X handles authentication.")
            .unwrap();
        corpus
            .add_document("b", "lunch", "The cafeteria serves lunch at noon.")
            .unwrap();
        let embedder = HashingEmbedder::default();
        let search = CorpusSearch::build(&corpus, &embedder).await.unwrap();

        let query = "What does module X do?";
        let dense = search
            .search(
                &SearchQuery::Vector(embedder.embed_sync(query)),
                SignalType::Dense,
                5,
            )
            .await
            .unwrap();
        assert_eq!(dense[0].chunk.corpus_id, "a");

        let lexical = search
            .search(&SearchQuery::Text(query.into()), SignalType::Lexical, 5)
            .await
            .unwrap();
        assert_eq!(lexical[0].chunk.corpus_id, "a");

        assert!(search
            .search(&SearchQuery::Text(query.into()), SignalType::Dense, 5)
            .await
            .is_err());
    }
}
