//! Pipeline stages: query expansion, hybrid retrieval, evidence compression,
//! answer generation, validation and the correction decision.

pub mod context_compressor;
pub mod corrector;
pub mod generator;
pub mod query_expander;
pub mod retriever;
pub mod text;
pub mod validator;

pub use context_compressor::{CompressedContext, ContextCompressor};
pub use corrector::{best_attempt, CorrectionDecision, CorrectionFeedback, Corrector};
pub use generator::{build_prompt, AnswerGenerator};
pub use query_expander::{Expansion, QueryExpander};
pub use retriever::{Retrieval, Retriever};
pub use validator::{
    AnswerValidator, GeneratorRelevanceJudge, LexicalRelevanceJudge, RelevanceJudge,
};
