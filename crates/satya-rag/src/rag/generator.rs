//! Builds the answer prompt from compressed evidence and calls the
//! `TextGenerator`, retrying transient failures with backoff.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use super::corrector::CorrectionFeedback;
use crate::config::GenerationSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::limits::ServiceLimits;
use crate::llm::{GenerationOptions, TextGenerator};
use crate::types::{EvidenceSpan, GenerationAttempt};

const ANSWER_INSTRUCTIONS: &str = "Answer the question based on the provided context. \
If the context doesn't contain enough information, clearly state this limitation. \
Be concise but comprehensive.";

pub struct AnswerGenerator {
    generator: Arc<dyn TextGenerator>,
    limits: ServiceLimits,
    settings: GenerationSettings,
}

impl AnswerGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        limits: ServiceLimits,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            generator,
            limits,
            settings,
        }
    }

    /// Generate attempt number `index` over `evidence`. With `feedback`, the
    /// prompt also lists the claims the validator flagged last time.
    pub async fn generate(
        &self,
        query: &str,
        evidence: Arc<[EvidenceSpan]>,
        feedback: Option<&CorrectionFeedback>,
        index: usize,
    ) -> PipelineResult<GenerationAttempt> {
        let prompt = build_prompt(query, &evidence, feedback);
        let options = GenerationOptions::new(self.settings.max_tokens, self.settings.temperature);
        let tries = self.settings.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..tries {
            if attempt > 0 {
                let backoff = self.settings.retry_backoff_ms.saturating_mul(1 << (attempt - 1).min(16));
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff,
                    error = %last_error,
                    "Retrying generation"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let result = match self.limits.generation().await {
                Ok(_permit) => self.generator.generate(&prompt, &options).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(answer) if !answer.trim().is_empty() => {
                    tracing::debug!(
                        index,
                        generator = self.generator.name(),
                        chars = answer.len(),
                        "Answer generated"
                    );
                    return Ok(GenerationAttempt {
                        index,
                        prompt,
                        answer: answer.trim().to_string(),
                        evidence,
                        score: None,
                    });
                }
                Ok(_) => last_error = "generator returned an empty answer".to_string(),
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(PipelineError::Generation {
            attempts: tries,
            message: last_error,
        })
    }
}

/// Numbered evidence blocks, the question, the answering instructions and,
/// on a correction, the flagged claims plus the previous answer.
pub fn build_prompt(
    query: &str,
    evidence: &[EvidenceSpan],
    feedback: Option<&CorrectionFeedback>,
) -> String {
    let mut prompt = String::from("Context:\n");
    for (i, span) in evidence.iter().enumerate() {
        let doc_span = span.document_span();
        let _ = writeln!(
            prompt,
            "[{}] ({}, bytes {}-{})\n{}\n",
            i + 1,
            span.chunk().corpus_id,
            doc_span.start,
            doc_span.end,
            span.text()
        );
    }

    let _ = write!(
        prompt,
        "Question: {}\n\nInstructions: {}\n",
        query, ANSWER_INSTRUCTIONS
    );

    if let Some(feedback) = feedback {
        prompt.push_str("\nA previous answer was not fully supported by the context.\n");
        if feedback.flagged_claims.is_empty() {
            let _ = writeln!(
                prompt,
                "It did not address the question directly (relevance {:.2}).",
                feedback.relevance
            );
        } else {
            prompt.push_str("These claims are not supported by the context:\n");
            for claim in &feedback.flagged_claims {
                let _ = writeln!(prompt, "- \"{}\" ({})", claim.text, claim.reason);
            }
        }
        let _ = write!(
            prompt,
            "Write a corrected answer that is fully grounded in the context and directly \
             answers the question. Remove or fix the problems listed above.\n\n\
             Previous answer:\n{}\n",
            feedback.previous_answer
        );
    }

    prompt.push_str("\nAnswer:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{evidence_span, ScriptedGenerator};
    use crate::types::FlaggedClaim;

    fn settings() -> GenerationSettings {
        GenerationSettings {
            retry_backoff_ms: 10,
            ..GenerationSettings::default()
        }
    }

    #[test]
    fn test_prompt_lists_evidence_in_order() {
        let evidence = vec![
            evidence_span("doc-a", "Module X handles authentication."),
            evidence_span("doc-b", "Module X rotates tokens."),
        ];
        let prompt = build_prompt("What does module X do?", &evidence, None);
        let a = prompt.find("[1] (doc-a").unwrap();
        let b = prompt.find("[2] (doc-b").unwrap();
        assert!(a < b);
        assert!(prompt.contains("Question: What does module X do?"));
        assert!(prompt.ends_with("Answer:"));
        assert!(!prompt.contains("Previous answer"));
    }

    #[test]
    fn test_correction_prompt_carries_flagged_claims() {
        let feedback = CorrectionFeedback {
            previous_answer: "Module X was written in 1999.".into(),
            flagged_claims: vec![FlaggedClaim {
                text: "Module X was written in 1999.".into(),
                reason: "numbers not found in evidence: 1999".into(),
            }],
            groundedness: 0.0,
            relevance: 1.0,
        };
        let prompt = build_prompt("q", &[], Some(&feedback));
        assert!(prompt.contains("- \"Module X was written in 1999.\""));
        assert!(prompt.contains("Previous answer:\nModule X was written in 1999."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let generator = Arc::new(ScriptedGenerator::new(|_, call| {
            if call < 2 {
                Err(anyhow::anyhow!("backend busy"))
            } else {
                Ok("  Module X handles authentication.  ".to_string())
            }
        }));
        let wrapper = AnswerGenerator::new(generator.clone(), ServiceLimits::default(), settings());
        let evidence: Arc<[EvidenceSpan]> = vec![evidence_span("doc-a", "Module X handles authentication.")].into();

        let attempt = wrapper.generate("q", evidence, None, 0).await.unwrap();
        assert_eq!(attempt.answer, "Module X handles authentication.");
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_bound() {
        let generator = Arc::new(ScriptedGenerator::new(|_, _| Ok("   ".to_string())));
        let wrapper = AnswerGenerator::new(generator.clone(), ServiceLimits::default(), settings());

        let err = wrapper
            .generate("q", Arc::from(Vec::<EvidenceSpan>::new()), None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation { attempts: 3, .. }));
        assert_eq!(generator.calls(), 3);
    }
}
