//! Context Compression Module
//!
//! Extractive compression of reranked chunks down to the sentences that matter
//! for the query. Nothing is rewritten: every kept piece is an `EvidenceSpan`
//! whose offsets slice back to the exact chunk text.

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use super::text::{sentence_spans, term_set, tokenize};
use crate::config::CompressionConfig;
use crate::reranking::RelevanceScorer;
use crate::types::{Candidate, ChunkRef, EvidenceSpan, RankedCandidate};

/// Evidence for one run, in reranked candidate order.
#[derive(Debug, Clone, Default)]
pub struct CompressedContext {
    pub evidence: Vec<EvidenceSpan>,
    /// Candidates that contributed at least one span, in order.
    pub kept_candidates: Vec<ChunkRef>,
    pub source_bytes: usize,
    pub kept_bytes: usize,
}

impl CompressedContext {
    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Kept evidence bytes over candidate bytes; 0.0 for no input.
    pub fn compression_ratio(&self) -> f32 {
        if self.source_bytes == 0 {
            0.0
        } else {
            self.kept_bytes as f32 / self.source_bytes as f32
        }
    }
}

/// Cheap to clone; clones share the scorer.
#[derive(Clone)]
pub struct ContextCompressor {
    config: CompressionConfig,
    scorer: Arc<dyn RelevanceScorer>,
}

#[derive(Debug, Clone, Copy)]
struct SentenceScore {
    index: usize,
    start: usize,
    end: usize,
    score: f32,
    matched: usize,
    structured: bool,
}

impl ContextCompressor {
    /// `scorer` should be the reranker's scorer. It picks the evidence of
    /// candidates that rank well without sharing any term with the query.
    pub fn new(config: CompressionConfig, scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { config, scorer }
    }

    /// Compress every candidate independently, then assemble in rank order
    /// until the byte budget is spent. A candidate that yields no relevant
    /// span, or whose extraction fails, is left out.
    pub fn compress(&self, query: &str, ranked: &[RankedCandidate]) -> CompressedContext {
        let query_terms = term_set(query);

        let extracted: Vec<(&Candidate, Result<Vec<EvidenceSpan>>)> = ranked
            .par_iter()
            .map(|r| {
                let spans = self.extract_spans(&query_terms, &r.candidate).and_then(|spans| {
                    if spans.is_empty() && r.rerank_score >= self.config.rerank_keep_threshold {
                        self.best_scored_span(query, &r.candidate)
                    } else {
                        Ok(spans)
                    }
                });
                (&r.candidate, spans)
            })
            .collect();

        let mut context = CompressedContext::default();
        for (candidate, spans) in extracted {
            context.source_bytes += candidate.text.len();
            let spans = match spans {
                Ok(spans) => spans,
                Err(e) => {
                    tracing::warn!(chunk = %candidate.chunk, error = %e, "Evidence extraction failed, skipping candidate");
                    continue;
                }
            };
            if spans.is_empty() {
                tracing::debug!(chunk = %candidate.chunk, "No relevant span, dropping candidate");
                continue;
            }
            if context.kept_bytes >= self.config.max_total_chars {
                tracing::debug!(chunk = %candidate.chunk, "Evidence budget spent, dropping candidate");
                continue;
            }

            context.kept_bytes += spans.iter().map(|s| s.text().len()).sum::<usize>();
            context.kept_candidates.push(candidate.chunk.clone());
            context.evidence.extend(spans);
        }

        tracing::info!(
            candidates = ranked.len(),
            kept = context.kept_candidates.len(),
            spans = context.evidence.len(),
            ratio = context.compression_ratio(),
            "Context compression complete"
        );
        context
    }

    fn extract_spans(
        &self,
        query_terms: &HashSet<String>,
        candidate: &Candidate,
    ) -> Result<Vec<EvidenceSpan>> {
        let text = candidate.text.as_str();
        let sentences = sentence_spans(text);
        let total = sentences.len();

        let mut eligible: Vec<SentenceScore> = sentences
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                let (score, matched, structured) =
                    score_sentence(&text[start..end], query_terms, index, total);
                SentenceScore {
                    index,
                    start,
                    end,
                    score,
                    matched,
                    structured,
                }
            })
            .filter(|s| {
                s.score >= self.config.min_sentence_score && (s.matched > 0 || s.structured)
            })
            .collect();

        if !eligible.iter().any(|s| s.matched > 0) {
            return Ok(Vec::new());
        }

        eligible.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
        eligible.truncate(self.config.max_sentences_per_chunk);
        eligible.sort_by_key(|s| s.index);

        // Adjacent picks become one contiguous span.
        let mut groups: Vec<(usize, usize, usize, bool)> = Vec::new();
        for s in eligible {
            match groups.last_mut() {
                Some((_, end, last_index, justified)) if *last_index + 1 == s.index => {
                    *end = s.end;
                    *last_index = s.index;
                    *justified |= s.matched > 0;
                }
                _ => groups.push((s.start, s.end, s.index, s.matched > 0)),
            }
        }

        groups
            .into_iter()
            .map(|(start, end, _, justified)| {
                EvidenceSpan::extract(&candidate.chunk, text, start, end, justified)
                    .ok_or_else(|| anyhow!("span {}..{} does not slice chunk {}", start, end, candidate.chunk))
            })
            .collect()
    }

    /// The single sentence the scorer rates highest, for a candidate with no
    /// lexical overlap. Nothing when every sentence scores zero.
    fn best_scored_span(&self, query: &str, candidate: &Candidate) -> Result<Vec<EvidenceSpan>> {
        let text = candidate.text.as_str();
        let mut best: Option<(f32, usize, usize)> = None;
        for (start, end) in sentence_spans(text) {
            let score = self.scorer.score(query, &text[start..end])?;
            if !score.is_finite() || score <= 0.0 {
                continue;
            }
            if best.map_or(true, |(top, _, _)| score > top) {
                best = Some((score, start, end));
            }
        }

        let Some((score, start, end)) = best else {
            return Ok(Vec::new());
        };
        tracing::debug!(
            chunk = %candidate.chunk,
            scorer = self.scorer.name(),
            score,
            "Keeping scorer-selected sentence"
        );
        let span = EvidenceSpan::extract(&candidate.chunk, text, start, end, true)
            .ok_or_else(|| anyhow!("span {}..{} does not slice chunk {}", start, end, candidate.chunk))?;
        Ok(vec![span])
    }
}

/// Score a sentence by query relevance. Returns `(score, matched query
/// terms, looks like structured data)`.
///
/// Factors:
/// - Term overlap with the query (primary signal)
/// - Density: matches per word
/// - Position: first and last sentences often summarise
/// - Key-value lines ("Name: value") and contact-like facts get a boost
fn score_sentence(
    sentence: &str,
    query_terms: &HashSet<String>,
    position: usize,
    total_sentences: usize,
) -> (f32, usize, bool) {
    let words = tokenize(sentence).len();
    if words == 0 {
        return (0.0, 0, false);
    }

    let sentence_terms = term_set(sentence);
    let matched = query_terms
        .iter()
        .filter(|term| sentence_terms.contains(*term))
        .count();

    let term_score = if query_terms.is_empty() {
        0.0
    } else {
        matched as f32 / query_terms.len() as f32
    };
    let density = matched as f32 / words as f32;

    let position_score = if position == 0 || position + 1 == total_sentences {
        0.1
    } else if position <= 2 {
        0.05
    } else {
        0.0
    };

    let kv_boost = if sentence.contains(':') && sentence.len() < 200 {
        0.15
    } else {
        0.0
    };

    let lower = sentence.to_lowercase();
    let structured = lower.contains('@')
        || lower.contains("http")
        || lower.contains("phone")
        || lower.contains("tel:")
        || (lower.contains("email") && sentence.len() < 200);
    let structured_boost = if structured { 0.35 } else { 0.0 };

    (
        term_score * 0.6 + density * 0.15 + position_score + kv_boost + structured_boost,
        matched,
        structured,
    )
}
