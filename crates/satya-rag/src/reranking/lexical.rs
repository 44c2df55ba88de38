//! Deterministic query/document scorer that needs no model.
//!
//! Blends three signals, each in [0, 1]: how many distinct query terms the
//! document covers, a saturated term frequency, and how tightly the matched
//! terms cluster together.

use anyhow::Result;
use std::collections::HashMap;

use super::RelevanceScorer;
use crate::rag::text::{content_terms, content_tokens};

const COVERAGE_WEIGHT: f32 = 0.6;
const FREQUENCY_WEIGHT: f32 = 0.25;
const PROXIMITY_WEIGHT: f32 = 0.15;
/// BM25-style saturation constant
const TF_SATURATION: f32 = 1.2;

#[derive(Debug, Default, Clone)]
pub struct LexicalCrossScorer;

impl LexicalCrossScorer {
    pub fn new() -> Self {
        Self
    }
}

impl RelevanceScorer for LexicalCrossScorer {
    fn score(&self, query: &str, document: &str) -> Result<f32> {
        let query_terms = content_terms(query);
        if query_terms.is_empty() {
            return Ok(0.0);
        }
        let index: HashMap<&str, usize> = query_terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let mut tf = vec![0usize; query_terms.len()];
        let mut positions: Vec<(usize, usize)> = Vec::new();
        for (pos, token) in content_tokens(document).iter().enumerate() {
            if let Some(&term) = index.get(token.as_str()) {
                tf[term] += 1;
                positions.push((pos, term));
            }
        }

        let matched = tf.iter().filter(|&&n| n > 0).count();
        if matched == 0 {
            return Ok(0.0);
        }

        let coverage = matched as f32 / query_terms.len() as f32;
        let frequency = tf
            .iter()
            .map(|&n| n as f32 / (n as f32 + TF_SATURATION))
            .sum::<f32>()
            / query_terms.len() as f32;
        let proximity = matched as f32 / min_window(&positions, query_terms.len(), matched) as f32;

        Ok(COVERAGE_WEIGHT * coverage + FREQUENCY_WEIGHT * frequency + PROXIMITY_WEIGHT * proximity)
    }

    fn name(&self) -> &str {
        "lexical-cross"
    }
}

/// Length (in tokens) of the shortest window holding one occurrence of each of
/// the `matched` distinct terms in `positions`.
fn min_window(positions: &[(usize, usize)], num_terms: usize, matched: usize) -> usize {
    let mut counts = vec![0usize; num_terms];
    let mut covered = 0;
    let mut best = usize::MAX;
    let mut left = 0;

    for right in 0..positions.len() {
        let term = positions[right].1;
        counts[term] += 1;
        if counts[term] == 1 {
            covered += 1;
        }
        while covered == matched {
            let width = positions[right].0 - positions[left].0 + 1;
            best = best.min(width);
            let leaving = positions[left].1;
            counts[leaving] -= 1;
            if counts[leaving] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }

    best.max(matched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_document_outscores_unrelated() {
        let scorer = LexicalCrossScorer::new();
        let query = "What does module X do?";
        let a = scorer.score(query, "Module X handles authentication.").unwrap();
        let b = scorer
            .score(query, "The cafeteria serves lunch at noon.")
            .unwrap();
        assert!(a > b);
        assert_eq!(b, 0.0);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_adjacent_terms_beat_scattered_terms() {
        let scorer = LexicalCrossScorer::new();
        let query = "token refresh";
        let tight = scorer
            .score(query, "The token refresh runs hourly in the gateway service.")
            .unwrap();
        let loose = scorer
            .score(query, "The token lives in storage, the gateway service handles a refresh.")
            .unwrap();
        assert!(tight > loose);
    }

    #[test]
    fn test_min_window() {
        // terms 0 and 1 at positions 0, 5, 6
        assert_eq!(min_window(&[(0, 0), (5, 0), (6, 1)], 2, 2), 2);
        assert_eq!(min_window(&[(3, 0)], 1, 1), 1);
    }
}
