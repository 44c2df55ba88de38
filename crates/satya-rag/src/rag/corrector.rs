//! Decides what happens after each validation: accept, regenerate with
//! feedback, or stop and hand back the best attempt.

use crate::types::{FlaggedClaim, GenerationAttempt, ValidationScore};

/// What the next generation attempt is told about the previous one.
#[derive(Debug, Clone)]
pub struct CorrectionFeedback {
    pub previous_answer: String,
    pub flagged_claims: Vec<FlaggedClaim>,
    pub groundedness: f32,
    pub relevance: f32,
}

impl CorrectionFeedback {
    pub fn from_attempt(answer: &str, score: &ValidationScore) -> Self {
        Self {
            previous_answer: answer.to_string(),
            flagged_claims: score.flagged_claims.clone(),
            groundedness: score.groundedness,
            relevance: score.relevance,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CorrectionDecision {
    Accept,
    Correct(CorrectionFeedback),
    AbortWithBest,
}

#[derive(Debug, Clone, Copy)]
pub struct Corrector {
    acceptance_threshold: f32,
    max_corrections: usize,
}

impl Corrector {
    pub fn new(acceptance_threshold: f32, max_corrections: usize) -> Self {
        Self {
            acceptance_threshold,
            max_corrections,
        }
    }

    /// `corrections_so_far` counts regenerations already made, so the first
    /// attempt is decided with 0.
    pub fn decide(
        &self,
        answer: &str,
        score: &ValidationScore,
        corrections_so_far: usize,
    ) -> CorrectionDecision {
        if score.overall_quality >= self.acceptance_threshold {
            CorrectionDecision::Accept
        } else if corrections_so_far < self.max_corrections {
            CorrectionDecision::Correct(CorrectionFeedback::from_attempt(answer, score))
        } else {
            CorrectionDecision::AbortWithBest
        }
    }
}

/// Highest-quality attempt. A later attempt only wins with a strictly higher
/// score, so ties keep the earlier one.
pub fn best_attempt(attempts: &[GenerationAttempt]) -> Option<&GenerationAttempt> {
    attempts.iter().fold(None, |best, attempt| match best {
        Some(b) if attempt.quality() <= b.quality() => Some(b),
        _ => Some(attempt),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::attempt;

    fn score(quality: f32) -> ValidationScore {
        ValidationScore::new(quality, 1.0, Vec::new(), 0.7)
    }

    #[test]
    fn test_accepts_at_threshold() {
        let corrector = Corrector::new(0.7, 2);
        assert!(matches!(
            corrector.decide("a", &score(0.7), 0),
            CorrectionDecision::Accept
        ));
    }

    #[test]
    fn test_corrects_until_budget_spent() {
        let corrector = Corrector::new(0.7, 1);
        let low = score(0.3);
        match corrector.decide("bad answer", &low, 0) {
            CorrectionDecision::Correct(feedback) => {
                assert_eq!(feedback.previous_answer, "bad answer");
                assert!((feedback.groundedness - 0.3).abs() < 1e-6);
            }
            other => panic!("expected correction, got {:?}", other),
        }
        assert!(matches!(
            corrector.decide("bad answer", &low, 1),
            CorrectionDecision::AbortWithBest
        ));
    }

    #[test]
    fn test_zero_budget_aborts_immediately() {
        let corrector = Corrector::new(0.7, 0);
        assert!(matches!(
            corrector.decide("a", &score(0.1), 0),
            CorrectionDecision::AbortWithBest
        ));
    }

    #[test]
    fn test_best_attempt_prefers_strictly_higher() {
        let attempts = vec![
            attempt(0, "first", Some(0.5)),
            attempt(1, "second", Some(0.5)),
            attempt(2, "third", Some(0.6)),
            attempt(3, "fourth", None),
        ];
        assert_eq!(best_attempt(&attempts).unwrap().answer, "third");
        assert_eq!(best_attempt(&attempts[..2]).unwrap().answer, "first");
        assert!(best_attempt(&[]).is_none());
    }
}
