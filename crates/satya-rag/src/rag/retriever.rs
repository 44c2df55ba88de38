//! Multi-variant hybrid retrieval.
//!
//! Every (variant, signal) pair becomes one search call. Calls run
//! concurrently under the shared service limits; fusion waits for all of
//! them and fuses whatever succeeded.

use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embeddings::CachedEmbedder;
use crate::error::{PipelineError, PipelineResult};
use crate::limits::ServiceLimits;
use crate::search::{reciprocal_rank_fusion, RankedList, SearchQuery, SignalType, SimilaritySearch};
use crate::storage::CorpusReader;
use crate::types::{Candidate, QueryVariant};

#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Fused candidates, best first, `fused_rank` 1-based and contiguous.
    pub candidates: Vec<Candidate>,
    pub lists_searched: usize,
    pub lists_failed: usize,
}

pub struct Retriever {
    search: Arc<dyn SimilaritySearch>,
    embedder: Arc<CachedEmbedder>,
    corpus: Arc<dyn CorpusReader>,
    limits: ServiceLimits,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        search: Arc<dyn SimilaritySearch>,
        embedder: Arc<CachedEmbedder>,
        corpus: Arc<dyn CorpusReader>,
        limits: ServiceLimits,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            search,
            embedder,
            corpus,
            limits,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        variants: &[QueryVariant],
        retrieval_k: usize,
    ) -> PipelineResult<Retrieval> {
        let jobs: Vec<(usize, &QueryVariant, SignalType)> = variants
            .iter()
            .enumerate()
            .flat_map(|(i, v)| self.config.signals.iter().map(move |&s| (i, v, s)))
            .collect();

        let results = join_all(
            jobs.iter()
                .map(|&(i, variant, signal)| self.search_list(i, variant, signal, retrieval_k)),
        )
        .await;

        let mut lists = Vec::with_capacity(results.len());
        let mut last_error = None;
        for ((i, variant, signal), result) in jobs.iter().zip(results) {
            match result {
                Ok(list) => lists.push(list),
                Err(e) => {
                    tracing::warn!(
                        variant = i,
                        tag = %variant.tag(),
                        signal = %signal,
                        error = %e,
                        "Search failed for variant, continuing without it"
                    );
                    last_error = Some(e);
                }
            }
        }

        let lists_failed = jobs.len() - lists.len();
        if lists.is_empty() {
            return Err(PipelineError::Retrieval {
                message: match last_error {
                    Some(e) => format!("similarity search unreachable: {}", e),
                    None => "no searches to run".to_string(),
                },
            });
        }

        let fused = reciprocal_rank_fusion(
            &lists,
            self.config.rrf_k,
            |signal| self.config.weight_for(signal),
            retrieval_k,
        );
        if fused.is_empty() {
            return Err(PipelineError::Retrieval {
                message: "no candidates for any variant".to_string(),
            });
        }

        let texts = join_all(fused.iter().map(|hit| self.corpus.chunk_text(&hit.chunk))).await;

        let mut candidates = Vec::with_capacity(fused.len());
        for (hit, text) in fused.into_iter().zip(texts) {
            match text {
                Ok(text) => candidates.push(Candidate {
                    chunk: hit.chunk,
                    text,
                    variant_scores: hit.variant_scores,
                    fused_score: hit.fused_score,
                    fused_rank: candidates.len() + 1,
                }),
                Err(e) => {
                    tracing::warn!(chunk = %hit.chunk, error = %e, "Could not load candidate text, dropping");
                }
            }
        }
        if candidates.is_empty() {
            return Err(PipelineError::Retrieval {
                message: "no candidate text could be loaded from the corpus".to_string(),
            });
        }

        tracing::info!(
            variants = variants.len(),
            lists = lists.len(),
            lists_failed,
            candidates = candidates.len(),
            "Hybrid retrieval complete"
        );

        Ok(Retrieval {
            candidates,
            lists_searched: lists.len(),
            lists_failed,
        })
    }

    async fn search_list(
        &self,
        variant_index: usize,
        variant: &QueryVariant,
        signal: SignalType,
        k: usize,
    ) -> Result<RankedList> {
        let query = match signal {
            SignalType::Dense => {
                let _permit = self.limits.embedding().await?;
                SearchQuery::Vector(self.embedder.embed_cached(variant.text()).await?)
            }
            SignalType::Lexical => SearchQuery::Text(variant.text().to_string()),
        };

        let mut hits = {
            let _permit = self.limits.search().await?;
            self.search.search(&query, signal, k).await?
        };
        hits.truncate(k);

        tracing::debug!(
            variant = variant_index,
            signal = %signal,
            hits = hits.len(),
            "Search list returned"
        );
        Ok(RankedList {
            variant: variant_index,
            signal,
            hits,
        })
    }
}
