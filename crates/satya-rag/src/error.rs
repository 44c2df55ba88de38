//! Pipeline error taxonomy.
//!
//! Low validation scores are not errors; they are ordinary data that drive the
//! correction loop, so there is no variant for them.

use crate::types::{ErrorKind, FailureDetail, Stage};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Every expansion call failed. Recovered by falling back to the original
    /// query, so this only ever shows up in diagnostics.
    #[error("query expansion failed: {message}")]
    Expansion { message: String },

    #[error("retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("generation failed after {attempts} tries: {message}")]
    Generation { attempts: usize, message: String },

    #[error("run deadline of {timeout_ms}ms exceeded during {stage}")]
    Timeout { stage: Stage, timeout_ms: u64 },

    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Expansion { .. } => ErrorKind::ExpansionFailure,
            Self::Retrieval { .. } => ErrorKind::RetrievalFailure,
            Self::Generation { .. } => ErrorKind::GenerationFailure,
            Self::Timeout { .. } => ErrorKind::TimeoutExceeded,
            Self::Config { .. } => ErrorKind::ConfigurationError,
        }
    }

    pub fn into_failure(self, stage: Stage) -> FailureDetail {
        FailureDetail {
            stage,
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_detail_carries_stage_and_kind() {
        let err = PipelineError::Retrieval {
            message: "no candidates for any variant".into(),
        };
        let detail = err.into_failure(Stage::Retrieve);
        assert_eq!(detail.stage, Stage::Retrieve);
        assert_eq!(detail.kind, ErrorKind::RetrievalFailure);
        assert!(detail.message.contains("no candidates"));
    }

    #[test]
    fn test_timeout_message_names_stage() {
        let err = PipelineError::Timeout {
            stage: Stage::Generate,
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "run deadline of 50ms exceeded during GENERATE");
    }
}
