//! Second-pass relevance scoring against the original query.

pub mod lexical;

pub use lexical::LexicalCrossScorer;

use anyhow::Result;
use rayon::prelude::*;
use std::sync::Arc;

use crate::types::{Candidate, RankedCandidate};

/// Cross-encoder style scorer: sees the query and the document together.
/// Must be deterministic for a given pair.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, document: &str) -> Result<f32>;

    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { scorer }
    }

    /// Score every candidate against `query` and keep the best `rerank_k`.
    ///
    /// Output is sorted by rerank score descending, ties by fused rank
    /// ascending. Candidates the scorer fails on (or scores NaN) are dropped.
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        rerank_k: usize,
    ) -> Vec<RankedCandidate> {
        let total = candidates.len();
        let scorer = self.scorer.as_ref();

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_par_iter()
            .filter_map(|candidate| match scorer.score(query, &candidate.text) {
                Ok(score) if score.is_finite() => Some(RankedCandidate {
                    candidate,
                    rerank_score: score,
                }),
                Ok(score) => {
                    tracing::warn!(chunk = %candidate.chunk, score, "Non-finite rerank score, dropping candidate");
                    None
                }
                Err(e) => {
                    tracing::warn!(chunk = %candidate.chunk, error = %e, "Rerank scoring failed, dropping candidate");
                    None
                }
            })
            .collect();

        sort_ranked(&mut ranked);
        ranked.truncate(rerank_k);

        tracing::info!(
            scorer = scorer.name(),
            candidates = total,
            kept = ranked.len(),
            top_score = ranked.first().map(|r| r.rerank_score).unwrap_or(0.0),
            "Reranking complete"
        );
        ranked
    }
}

/// Rerank score descending, then fused rank ascending, then chunk.
pub fn sort_ranked(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| {
        b.rerank_score
            .total_cmp(&a.rerank_score)
            .then(a.candidate.fused_rank.cmp(&b.candidate.fused_rank))
            .then_with(|| a.candidate.chunk.cmp(&b.candidate.chunk))
    });
}
