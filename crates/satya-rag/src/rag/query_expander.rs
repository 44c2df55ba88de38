//! Query Expansion Module
//!
//! Turns the user's question into retrieval variants: the original query,
//! optionally a hypothetical answer document (HyDE), and paraphrases that
//! look at the question from different angles. Every generator call is
//! best-effort; a failed call only loses its own variant.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ExpansionConfig;
use crate::error::PipelineError;
use crate::limits::ServiceLimits;
use crate::llm::{GenerationOptions, TextGenerator};
use crate::types::{Query, QueryVariant, VariantTag};

/// Angles used for paraphrases, cycled when more are requested.
const PARAPHRASE_FOCUSES: &[&str] = &[
    "a more specific version",
    "a broader contextual version",
    "a version from a different perspective",
];

/// Leading labels a model tends to put in front of a rewritten query.
const VARIANT_LABELS: &[&str] = &[
    "specific:",
    "broad:",
    "alternative:",
    "rewritten query:",
    "query:",
    "version:",
];

#[derive(Debug)]
pub struct Expansion {
    /// Original query first, then HyDE (if any), then paraphrases.
    pub variants: Vec<QueryVariant>,
    /// Generator calls that failed or produced nothing usable.
    pub failures: Vec<PipelineError>,
}

impl Expansion {
    pub fn hyde_used(&self) -> bool {
        self.variants
            .iter()
            .any(|v| v.tag() == VariantTag::HypotheticalDoc)
    }
}

enum Job {
    Hyde,
    Paraphrase(&'static str),
}

pub struct QueryExpander {
    generator: Arc<dyn TextGenerator>,
    limits: ServiceLimits,
    config: ExpansionConfig,
}

impl QueryExpander {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        limits: ServiceLimits,
        config: ExpansionConfig,
    ) -> Self {
        Self {
            generator,
            limits,
            config,
        }
    }

    /// Expand `query` into at most `num_variations` variants (at least two
    /// when HyDE is on, so the hypothetical document always has room).
    /// Never fails: if every call fails the result is the original query alone.
    pub async fn expand(&self, query: &Query) -> Expansion {
        let options = query.options();
        let original = query.text();

        let budget = if options.use_hyde {
            options.num_variations.max(2)
        } else {
            options.num_variations
        };

        let mut jobs = Vec::new();
        if options.use_hyde {
            jobs.push(Job::Hyde);
        }
        let paraphrases = budget.saturating_sub(1 + jobs.len());
        jobs.extend(
            (0..paraphrases).map(|i| Job::Paraphrase(PARAPHRASE_FOCUSES[i % PARAPHRASE_FOCUSES.len()])),
        );

        let results = join_all(jobs.iter().map(|job| self.run_job(original, job))).await;

        let mut variants = vec![QueryVariant::original(original)];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(normalise(original));
        let mut failures = Vec::new();

        for (job, result) in jobs.iter().zip(results) {
            let tag = match job {
                Job::Hyde => VariantTag::HypotheticalDoc,
                Job::Paraphrase(_) => VariantTag::Paraphrase,
            };
            match result {
                Ok(text) if seen.insert(normalise(&text)) => {
                    variants.push(QueryVariant::new(text, tag));
                }
                Ok(text) => {
                    tracing::debug!(tag = %tag, variant = %text, "Duplicate variant dropped");
                }
                Err(e) => {
                    tracing::warn!(tag = %tag, error = %e, "Variant generation failed, dropping variant");
                    failures.push(e);
                }
            }
        }

        if !jobs.is_empty() && variants.len() == 1 {
            tracing::warn!(
                failures = failures.len(),
                "Query expansion produced nothing, using the original query only"
            );
        }
        tracing::info!(
            variants = variants.len(),
            failures = failures.len(),
            hyde = variants.iter().any(|v| v.tag() == VariantTag::HypotheticalDoc),
            "Query expansion complete"
        );

        Expansion { variants, failures }
    }

    async fn run_job(&self, query: &str, job: &Job) -> Result<String, PipelineError> {
        let (prompt, options, is_hyde) = match job {
            Job::Hyde => (
                hyde_prompt(query),
                GenerationOptions::new(self.config.hyde_max_tokens, self.config.hyde_temperature),
                true,
            ),
            Job::Paraphrase(focus) => (
                paraphrase_prompt(query, focus),
                GenerationOptions::new(
                    self.config.paraphrase_max_tokens,
                    self.config.paraphrase_temperature,
                ),
                false,
            ),
        };

        let output = {
            let _permit = self.limits.generation().await.map_err(expansion_error)?;
            self.generator
                .generate(&prompt, &options)
                .await
                .map_err(expansion_error)?
        };

        let cleaned = if is_hyde {
            output.trim().to_string()
        } else {
            clean_paraphrase(&output)
        };
        if cleaned.is_empty() {
            return Err(PipelineError::Expansion {
                message: "generator returned an empty variant".into(),
            });
        }
        Ok(cleaned)
    }
}

fn expansion_error(e: anyhow::Error) -> PipelineError {
    PipelineError::Expansion {
        message: e.to_string(),
    }
}

fn hyde_prompt(query: &str) -> String {
    format!(
        "Generate a hypothetical document that would perfectly answer this question: {}\n\n\
         The document should be factual, detailed, and comprehensive. Write as if you're \
         creating the ideal source document that contains the answer.\n\n\
         Hypothetical document:",
        query
    )
}

fn paraphrase_prompt(query: &str, focus: &str) -> String {
    format!(
        "Rewrite this search query as {}.\n\nOriginal query: {}\n\n\
         Respond with only the rewritten query on a single line.",
        focus, query
    )
}

/// First non-empty line with list numbering, labels and wrapping quotes
/// removed.
fn clean_paraphrase(output: &str) -> String {
    let Some(line) = output.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return String::new();
    };

    let mut line = line
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == '*')
        .trim();
    let lower = line.to_lowercase();
    if let Some(label) = VARIANT_LABELS.iter().find(|l| lower.starts_with(*l)) {
        if let Some(rest) = line.get(label.len()..) {
            line = rest.trim();
        }
    }
    line.trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

fn normalise(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
