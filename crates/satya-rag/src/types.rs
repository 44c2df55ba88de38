use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Byte range `[start, end)` inside a corpus document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OffsetSpan {
    pub start: usize,
    pub end: usize,
}

impl OffsetSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reference to one chunk of a corpus document. Two candidates are the same
/// document chunk exactly when their `ChunkRef`s are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkRef {
    pub corpus_id: String,
    pub span: OffsetSpan,
}

impl ChunkRef {
    pub fn new(corpus_id: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            span: OffsetSpan::new(start, end),
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}..{}", self.corpus_id, self.span.start, self.span.end)
    }
}

/// Per-run options resolved from the request and the pipeline config.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub use_hyde: bool,
    pub num_variations: usize,
    pub retrieval_k: usize,
    pub rerank_k: usize,
    pub max_corrections: usize,
    pub timeout: Duration,
}

/// The user's question plus its run options. Never mutated once built.
#[derive(Debug, Clone)]
pub struct Query {
    text: String,
    options: RunOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, options: RunOptions) -> Self {
        Self {
            text: text.into(),
            options,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }
}

/// Pipeline invocation as received from the API layer. Unset fields fall back
/// to the pipeline config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub use_hyde: Option<bool>,
    #[serde(default)]
    pub num_variations: Option<usize>,
    #[serde(default)]
    pub retrieval_k: Option<usize>,
    #[serde(default)]
    pub rerank_k: Option<usize>,
    #[serde(default)]
    pub max_corrections: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantTag {
    Original,
    Paraphrase,
    HypotheticalDoc,
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Original => "original",
            Self::Paraphrase => "paraphrase",
            Self::HypotheticalDoc => "hypothetical-doc",
        };
        f.write_str(s)
    }
}

/// A retrieval query derived from the original question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryVariant {
    text: String,
    tag: VariantTag,
}

impl QueryVariant {
    pub fn new(text: impl Into<String>, tag: VariantTag) -> Self {
        Self {
            text: text.into(),
            tag,
        }
    }

    pub fn original(text: impl Into<String>) -> Self {
        Self::new(text, VariantTag::Original)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tag(&self) -> VariantTag {
        self.tag
    }
}

/// A fused retrieval result. `variant_scores` maps variant index to the best
/// similarity that variant produced for this chunk across all signals.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: ChunkRef,
    pub text: String,
    pub variant_scores: BTreeMap<usize, f32>,
    pub fused_score: f32,
    /// 1-based position in the fused ranking.
    pub fused_rank: usize,
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub rerank_score: f32,
}

/// An exact excerpt of a candidate chunk. `start..end` are byte offsets into
/// the chunk text; `text` is always `&chunk_text[start..end]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSpan {
    chunk: ChunkRef,
    start: usize,
    end: usize,
    text: String,
    justified: bool,
}

impl EvidenceSpan {
    /// Slice `chunk_text` at `start..end`. Returns `None` when the range is out
    /// of bounds or not on char boundaries.
    pub fn extract(
        chunk: &ChunkRef,
        chunk_text: &str,
        start: usize,
        end: usize,
        justified: bool,
    ) -> Option<Self> {
        let text = chunk_text.get(start..end)?;
        Some(Self {
            chunk: chunk.clone(),
            start,
            end,
            text: text.to_string(),
            justified,
        })
    }

    pub fn chunk(&self) -> &ChunkRef {
        &self.chunk
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// True when the span matched query terms directly rather than being kept
    /// for structural reasons.
    pub fn justified(&self) -> bool {
        self.justified
    }

    /// Span position inside the whole corpus document.
    pub fn document_span(&self) -> OffsetSpan {
        OffsetSpan::new(
            self.chunk.span.start + self.start,
            self.chunk.span.start + self.end,
        )
    }

    pub fn matches_source(&self, chunk_text: &str) -> bool {
        chunk_text.get(self.start..self.end) == Some(self.text.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedClaim {
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_quality(overall_quality: f32) -> Self {
        if overall_quality > 0.8 {
            Self::High
        } else if overall_quality > 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationScore {
    pub groundedness: f32,
    pub relevance: f32,
    /// `min(groundedness, relevance)`.
    pub overall_quality: f32,
    pub flagged_claims: Vec<FlaggedClaim>,
    pub confidence_level: ConfidenceLevel,
    pub needs_correction: bool,
}

impl ValidationScore {
    pub fn new(
        groundedness: f32,
        relevance: f32,
        flagged_claims: Vec<FlaggedClaim>,
        acceptance_threshold: f32,
    ) -> Self {
        let groundedness = groundedness.clamp(0.0, 1.0);
        let relevance = relevance.clamp(0.0, 1.0);
        let overall_quality = groundedness.min(relevance);
        Self {
            groundedness,
            relevance,
            overall_quality,
            flagged_claims,
            confidence_level: ConfidenceLevel::from_quality(overall_quality),
            needs_correction: overall_quality < acceptance_threshold,
        }
    }

    /// Score used when no attempt was ever validated.
    pub fn unscored() -> Self {
        Self {
            groundedness: 0.0,
            relevance: 0.0,
            overall_quality: 0.0,
            flagged_claims: Vec::new(),
            confidence_level: ConfidenceLevel::Low,
            needs_correction: true,
        }
    }
}

/// One generate (+ validate) pass.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub index: usize,
    pub prompt: String,
    pub answer: String,
    pub evidence: Arc<[EvidenceSpan]>,
    pub score: Option<ValidationScore>,
}

impl GenerationAttempt {
    pub fn quality(&self) -> f32 {
        self.score.as_ref().map(|s| s.overall_quality).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Expand,
    Retrieve,
    Rerank,
    Compress,
    Generate,
    Validate,
    Correct,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Expand => "EXPAND",
            Self::Retrieve => "RETRIEVE",
            Self::Rerank => "RERANK",
            Self::Compress => "COMPRESS",
            Self::Generate => "GENERATE",
            Self::Validate => "VALIDATE",
            Self::Correct => "CORRECT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Accept,
    AbortWithBest,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ExpansionFailure,
    RetrievalFailure,
    GenerationFailure,
    TimeoutExceeded,
    ConfigurationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

/// Where an answer's evidence came from. `offset_span` is relative to the
/// whole corpus document, so `&document[offset_span] == excerpt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub corpus_id: String,
    pub offset_span: OffsetSpan,
    pub excerpt: String,
}

impl From<&EvidenceSpan> for SourceRef {
    fn from(span: &EvidenceSpan) -> Self {
        Self {
            corpus_id: span.chunk().corpus_id.clone(),
            offset_span: span.document_span(),
            excerpt: span.text().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    pub tag: VariantTag,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunDiagnostics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub variants: Vec<VariantSummary>,
    pub expansion_failures: usize,
    pub documents_retrieved: usize,
    pub documents_after_rerank: usize,
    pub documents_after_compression: usize,
    /// Kept evidence bytes over reranked candidate bytes.
    pub compression_ratio: f32,
    pub hyde_used: bool,
    pub stage_durations_ms: BTreeMap<Stage, u64>,
    pub processing_time_ms: u64,
    pub attempt_scores: Vec<f32>,
}

impl RunDiagnostics {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            variants: Vec::new(),
            expansion_failures: 0,
            documents_retrieved: 0,
            documents_after_rerank: 0,
            documents_after_compression: 0,
            compression_ratio: 0.0,
            hyde_used: false,
            stage_durations_ms: BTreeMap::new(),
            processing_time_ms: 0,
            attempt_scores: Vec::new(),
        }
    }

    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        *self.stage_durations_ms.entry(stage).or_insert(0) += elapsed.as_millis() as u64;
    }
}

/// Structured pipeline outcome returned to the API layer.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub query: String,
    pub response: String,
    pub validation_scores: ValidationScore,
    pub corrections_applied: usize,
    pub sources: Vec<SourceRef>,
    pub status: RunStatus,
    /// False when the answer did not clear the acceptance threshold.
    pub fully_validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    pub metadata: RunDiagnostics,
}
