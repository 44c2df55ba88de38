use std::collections::{BTreeMap, BTreeSet};

use super::{SearchHit, SignalType};
use crate::types::ChunkRef;

/// One ranked result list: what `variant` returned for `signal`.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub variant: usize,
    pub signal: SignalType,
    pub hits: Vec<SearchHit>,
}

/// A chunk after fusion, unique by `ChunkRef`.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk: ChunkRef,
    pub fused_score: f32,
    /// Best 1-based rank the chunk reached in any list.
    pub best_rank: usize,
    /// Highest raw similarity per variant index.
    pub variant_scores: BTreeMap<usize, f32>,
    pub signals: BTreeSet<SignalType>,
}

/// Weighted Reciprocal Rank Fusion over any number of (variant, signal) lists.
///
/// A chunk at 1-based rank `r` of a list contributes `weight(signal) / (k + r)`.
/// Raw similarity scores never enter the fused score; they are only kept per
/// variant for diagnostics.
///
/// The result does not depend on the order `lists` arrive in: lists are folded
/// in `(variant, signal)` order and ties are broken by best rank, then corpus
/// id, then span. A chunk repeated inside one list keeps its first (best) rank.
pub fn reciprocal_rank_fusion(
    lists: &[RankedList],
    k: usize,
    weight: impl Fn(SignalType) -> f32,
    top_k: usize,
) -> Vec<FusedHit> {
    let mut ordered: Vec<&RankedList> = lists.iter().collect();
    ordered.sort_by_key(|list| (list.variant, list.signal));

    let mut fused: BTreeMap<ChunkRef, FusedHit> = BTreeMap::new();

    for list in ordered {
        let w = weight(list.signal);
        let mut seen: BTreeSet<&ChunkRef> = BTreeSet::new();
        let mut rank = 0usize;

        for hit in &list.hits {
            if !seen.insert(&hit.chunk) {
                continue;
            }
            rank += 1;
            let contribution = w / (k as f32 + rank as f32);

            let entry = fused.entry(hit.chunk.clone()).or_insert_with(|| FusedHit {
                chunk: hit.chunk.clone(),
                fused_score: 0.0,
                best_rank: rank,
                variant_scores: BTreeMap::new(),
                signals: BTreeSet::new(),
            });
            entry.fused_score += contribution;
            entry.best_rank = entry.best_rank.min(rank);
            entry.signals.insert(list.signal);
            entry
                .variant_scores
                .entry(list.variant)
                .and_modify(|s| {
                    if hit.score > *s {
                        *s = hit.score;
                    }
                })
                .or_insert(hit.score);
        }
    }

    let mut merged: Vec<FusedHit> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk.cmp(&b.chunk))
    });
    merged.truncate(top_k);

    tracing::debug!(
        lists = lists.len(),
        fused = merged.len(),
        top_score = merged.first().map(|h| h.fused_score).unwrap_or(0.0),
        "RRF fusion complete"
    );

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hit(id: &str, start: usize, score: f32) -> SearchHit {
        SearchHit::new(ChunkRef::new(id, start, start + 10), score)
    }

    fn list(variant: usize, signal: SignalType, hits: Vec<SearchHit>) -> RankedList {
        RankedList {
            variant,
            signal,
            hits,
        }
    }

    #[test]
    fn test_chunk_in_several_lists_outranks_single_list_leader() {
        let lists = vec![
            list(0, SignalType::Dense, vec![hit("a", 0, 0.9), hit("b", 0, 0.8)]),
            list(0, SignalType::Lexical, vec![hit("c", 0, 7.0), hit("b", 0, 5.0)]),
            list(1, SignalType::Dense, vec![hit("b", 0, 0.7)]),
        ];
        let fused = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 10);

        assert_eq!(fused[0].chunk.corpus_id, "b");
        let expected = 2.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].fused_score - expected).abs() < 1e-6);
        assert_eq!(fused[0].best_rank, 1);
        assert_eq!(fused[0].variant_scores.get(&0), Some(&5.0));
        assert_eq!(fused[0].variant_scores.get(&1), Some(&0.7));
        assert_eq!(fused[0].signals.len(), 2);
    }

    #[test]
    fn test_duplicates_within_a_list_keep_first_rank() {
        let lists = vec![list(
            0,
            SignalType::Dense,
            vec![hit("a", 0, 0.9), hit("a", 0, 0.4), hit("b", 0, 0.3)],
        )];
        let fused = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 10);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-7);
        assert!((fused[1].fused_score - 1.0 / 62.0).abs() < 1e-7);
    }

    #[test]
    fn test_same_document_different_spans_are_distinct() {
        let lists = vec![list(
            0,
            SignalType::Lexical,
            vec![hit("doc", 0, 1.0), hit("doc", 600, 1.0)],
        )];
        let fused = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 10);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_ties_break_on_rank_then_chunk() {
        let lists = vec![
            list(0, SignalType::Dense, vec![hit("z", 0, 0.9)]),
            list(1, SignalType::Dense, vec![hit("a", 0, 0.9)]),
        ];
        let fused = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 10);
        assert_eq!(fused[0].chunk.corpus_id, "a");
        assert_eq!(fused[1].chunk.corpus_id, "z");
    }

    #[test]
    fn test_signal_weights_and_truncation() {
        let lists = vec![
            list(0, SignalType::Dense, vec![hit("a", 0, 0.9)]),
            list(0, SignalType::Lexical, vec![hit("b", 0, 9.0)]),
        ];
        let weight = |s: SignalType| match s {
            SignalType::Dense => 0.5,
            SignalType::Lexical => 1.0,
        };
        let fused = reciprocal_rank_fusion(&lists, 60, weight, 1);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk.corpus_id, "b");
    }

    fn arb_lists() -> impl Strategy<Value = Vec<RankedList>> {
        prop::collection::btree_map(
            (0usize..3, any::<bool>()),
            prop::collection::vec((0usize..6, 0usize..3, 0.0f32..1.0), 0..8),
            0..6,
        )
        .prop_map(|by_key| {
            by_key
                .into_iter()
                .map(|((variant, lexical), raw)| {
                    let signal = if lexical {
                        SignalType::Lexical
                    } else {
                        SignalType::Dense
                    };
                    let hits = raw
                        .into_iter()
                        .map(|(doc, span, score)| hit(&format!("doc-{doc}"), span * 100, score))
                        .collect();
                    list(variant, signal, hits)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_fusion_ignores_arrival_order(lists in arb_lists(), rotate in 0usize..6) {
            let forward = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 20);

            let mut shuffled = lists.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let by = rotate % shuffled.len();
                shuffled.rotate_left(by);
            }
            let other = reciprocal_rank_fusion(&shuffled, 60, |_| 1.0, 20);

            prop_assert_eq!(forward.len(), other.len());
            for (a, b) in forward.iter().zip(&other) {
                prop_assert_eq!(&a.chunk, &b.chunk);
                prop_assert_eq!(a.fused_score.to_bits(), b.fused_score.to_bits());
            }
        }

        #[test]
        fn prop_fused_chunks_are_unique_and_sorted(lists in arb_lists()) {
            let fused = reciprocal_rank_fusion(&lists, 60, |_| 1.0, 20);
            let distinct: BTreeSet<&ChunkRef> = fused.iter().map(|h| &h.chunk).collect();
            prop_assert_eq!(distinct.len(), fused.len());
            for pair in fused.windows(2) {
                prop_assert!(pair[0].fused_score >= pair[1].fused_score);
            }
        }
    }
}
