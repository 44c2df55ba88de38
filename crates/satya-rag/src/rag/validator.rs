//! Answer Validation Module
//!
//! Scores an answer against the evidence it was generated from. Groundedness
//! is claim-level: the answer is split into sentences, each sentence with
//! content is a claim, and a claim is supported when a single evidence span
//! covers enough of its terms and every number it states. Relevance comes
//! from a pluggable [`RelevanceJudge`].
//!
//! A low score is a normal result, never an error.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use super::text::{content_terms, sentence_spans, term_set, tokenize};
use crate::config::ValidationConfig;
use crate::limits::ServiceLimits;
use crate::llm::{GenerationOptions, TextGenerator};
use crate::types::{EvidenceSpan, FlaggedClaim, ValidationScore};

static CITATION_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+(?:\s*,\s*\d+)*\]").expect("citation marker regex is valid")
});

static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("score regex is valid"));

/// Phrases that mark a sentence as the answer admitting missing information.
/// Such sentences make no factual claim.
const LIMITATION_MARKERS: &[&str] = &[
    "does not contain",
    "doesn't contain",
    "does not mention",
    "doesn't mention",
    "not mentioned",
    "not enough information",
    "insufficient information",
    "no information",
    "cannot determine",
    "can't determine",
    "unable to determine",
];

pub struct AnswerValidator {
    judge: Arc<dyn RelevanceJudge>,
    config: ValidationConfig,
}

impl AnswerValidator {
    pub fn new(judge: Arc<dyn RelevanceJudge>, config: ValidationConfig) -> Self {
        Self { judge, config }
    }

    pub async fn validate(
        &self,
        query: &str,
        answer: &str,
        evidence: &[EvidenceSpan],
    ) -> ValidationScore {
        let (groundedness, flagged) = self.groundedness(answer, evidence);
        let relevance = if answer.trim().is_empty() {
            0.0
        } else {
            self.judge.relevance(query, answer).await
        };

        let score = ValidationScore::new(
            groundedness,
            relevance,
            flagged,
            self.config.acceptance_threshold,
        );
        tracing::info!(
            groundedness = score.groundedness,
            relevance = score.relevance,
            overall = score.overall_quality,
            flagged = score.flagged_claims.len(),
            judge = self.judge.name(),
            "Answer validated"
        );
        score
    }

    /// Fraction of claims supported by some evidence span, plus the claims
    /// that were not.
    pub fn groundedness(&self, answer: &str, evidence: &[EvidenceSpan]) -> (f32, Vec<FlaggedClaim>) {
        if answer.trim().is_empty() {
            return (0.0, Vec::new());
        }

        let span_terms: Vec<HashSet<String>> =
            evidence.iter().map(|span| term_set(span.text())).collect();
        let evidence_tokens: HashSet<String> = evidence
            .iter()
            .flat_map(|span| tokenize(span.text()))
            .collect();

        let mut countable = 0usize;
        let mut supported = 0usize;
        let mut flagged = Vec::new();

        for claim in extract_claims(answer) {
            let cleaned = CITATION_MARKER_RE.replace_all(claim, "");
            let claim_terms = content_terms(&cleaned);
            if claim_terms.is_empty() || is_limitation(&cleaned) {
                continue;
            }
            countable += 1;

            let best_overlap = span_terms
                .iter()
                .map(|terms| {
                    let hits = claim_terms.iter().filter(|t| terms.contains(*t)).count();
                    hits as f32 / claim_terms.len() as f32
                })
                .fold(0.0f32, f32::max);

            let missing_numbers: Vec<String> = tokenize(&cleaned)
                .into_iter()
                .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
                .filter(|t| !evidence_tokens.contains(t))
                .collect();

            let reason = if evidence.is_empty() {
                Some("no evidence available".to_string())
            } else if best_overlap < self.config.claim_support_threshold {
                Some(format!(
                    "no evidence span supports this claim (best term overlap {:.2})",
                    best_overlap
                ))
            } else if !missing_numbers.is_empty() {
                Some(format!(
                    "numbers not found in evidence: {}",
                    missing_numbers.join(", ")
                ))
            } else {
                None
            };

            match reason {
                None => supported += 1,
                Some(reason) => {
                    tracing::debug!(claim = %claim, reason = %reason, "Unsupported claim");
                    flagged.push(FlaggedClaim {
                        text: claim.to_string(),
                        reason,
                    });
                }
            }
        }

        if countable == 0 {
            return (1.0, flagged);
        }
        (supported as f32 / countable as f32, flagged)
    }
}

/// Sentences of the answer, as slices of it.
pub fn extract_claims(answer: &str) -> Vec<&str> {
    sentence_spans(answer)
        .into_iter()
        .map(|(start, end)| &answer[start..end])
        .collect()
}

fn is_limitation(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    LIMITATION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Scores how well an answer addresses the question, in [0, 1]. Never fails:
/// implementations degrade to a fallback instead.
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    async fn relevance(&self, query: &str, answer: &str) -> f32;

    fn name(&self) -> &str;
}

/// Share of the query's content terms that the answer mentions.
#[derive(Debug, Default, Clone)]
pub struct LexicalRelevanceJudge;

impl LexicalRelevanceJudge {
    pub fn score(&self, query: &str, answer: &str) -> f32 {
        let query_terms = content_terms(query);
        if query_terms.is_empty() {
            return if answer.trim().is_empty() { 0.0 } else { 1.0 };
        }
        let answer_terms = term_set(answer);
        let covered = query_terms
            .iter()
            .filter(|t| answer_terms.contains(*t))
            .count();
        covered as f32 / query_terms.len() as f32
    }
}

#[async_trait]
impl RelevanceJudge for LexicalRelevanceJudge {
    async fn relevance(&self, query: &str, answer: &str) -> f32 {
        self.score(query, answer)
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// Asks the generator to rate the answer. Falls back to the lexical judge
/// when the call fails or the reply holds no number.
pub struct GeneratorRelevanceJudge {
    generator: Arc<dyn TextGenerator>,
    limits: ServiceLimits,
    fallback: LexicalRelevanceJudge,
}

impl GeneratorRelevanceJudge {
    pub fn new(generator: Arc<dyn TextGenerator>, limits: ServiceLimits) -> Self {
        Self {
            generator,
            limits,
            fallback: LexicalRelevanceJudge,
        }
    }

    fn prompt(query: &str, answer: &str) -> String {
        format!(
            "Query: {}\n\nResponse: {}\n\nTask: Rate how well the response answers the query. \
             Score from 0.0 to 1.0 where:\n- 1.0 = Perfectly answers the query\n\
             - 0.5 = Partially answers the query\n- 0.0 = Does not answer the query\n\n\
             Respond with only the numeric score.",
            query, answer
        )
    }
}

/// First number in `output`, clamped to [0, 1].
pub fn parse_score(output: &str) -> Option<f32> {
    SCORE_RE
        .find(output)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|score| score.clamp(0.0, 1.0))
}

#[async_trait]
impl RelevanceJudge for GeneratorRelevanceJudge {
    async fn relevance(&self, query: &str, answer: &str) -> f32 {
        let options = GenerationOptions::new(8, 0.0);
        let result = match self.limits.generation().await {
            Ok(_permit) => {
                self.generator
                    .generate(&Self::prompt(query, answer), &options)
                    .await
            }
            Err(e) => Err(e),
        };

        match result.map(|output| parse_score(&output)) {
            Ok(Some(score)) => score,
            Ok(None) => {
                tracing::warn!("Relevance judge reply had no score, using lexical fallback");
                self.fallback.score(query, answer)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Relevance judge failed, using lexical fallback");
                self.fallback.score(query, answer)
            }
        }
    }

    fn name(&self) -> &str {
        "generator"
    }
}
