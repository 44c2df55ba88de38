//! Brute-force cosine index over chunk embeddings.

use rayon::prelude::*;

use super::SearchHit;
use crate::embeddings::cosine_similarity;
use crate::types::ChunkRef;

#[derive(Default)]
pub struct VectorIndex {
    entries: Vec<(ChunkRef, Vec<f32>)>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: ChunkRef, embedding: Vec<f32>) {
        self.entries.push((chunk, embedding));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `k` chunks by cosine similarity. Chunks with no positive similarity
    /// are not returned.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<SearchHit> = self
            .entries
            .par_iter()
            .filter_map(|(chunk, embedding)| {
                let score = cosine_similarity(query, embedding);
                (score > 0.0).then(|| SearchHit::new(chunk.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.cmp(&b.chunk))
        });
        scored.truncate(k);
        scored
    }
}
