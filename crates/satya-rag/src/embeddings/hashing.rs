//! Feature-hashed bag-of-words embeddings.
//!
//! No model, no network: each content token is hashed into one of `dimension`
//! buckets with a sign bit, term frequencies are dampened with a square root
//! and the vector is L2-normalised. Texts that share vocabulary end up with a
//! positive cosine similarity, which is all the dense signal needs offline.

use anyhow::Result;
use async_trait::async_trait;

use super::TextEmbedder;
use crate::rag::text::content_tokens;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in content_tokens(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        for value in vector.iter_mut() {
            *value = value.signum() * value.abs().sqrt();
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl TextEmbedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[test]
    fn test_embeddings_are_normalised_and_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed_sync("Module X handles authentication.");
        let b = embedder.embed_sync("Module X handles authentication.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_sync("What does module X do?");
        let related = embedder.embed_sync("Module X handles authentication.");
        let unrelated = embedder.embed_sync("The cafeteria serves lunch at noon.");
        assert!(
            cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated)
        );
    }

    #[test]
    fn test_stopword_only_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_sync("what is the").iter().all(|v| *v == 0.0));
    }
}
