//! Scripted capability fakes shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{GenerationOptions, TextGenerator};
use crate::reranking::RelevanceScorer;
use crate::search::{SearchHit, SearchQuery, SignalType, SimilaritySearch};
use crate::types::{
    Candidate, ChunkRef, EvidenceSpan, GenerationAttempt, RankedCandidate, RunOptions,
    ValidationScore,
};

type Script = dyn Fn(&str, usize) -> Result<String> + Send + Sync;

/// Generator whose reply is computed from the prompt and the 0-based call
/// number.
pub struct ScriptedGenerator {
    script: Box<Script>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    delay_from: usize,
}

impl ScriptedGenerator {
    pub fn new(script: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            delay: None,
            delay_from: 0,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only calls numbered `from` and later.
    pub fn with_delay_from(mut self, from: usize, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.delay_from = from;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay.filter(|_| call >= self.delay_from) {
            tokio::time::sleep(delay).await;
        }
        (self.script)(prompt, call)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Returns the same hits for every query and signal.
pub struct FixedSearch {
    hits: Vec<SearchHit>,
}

impl FixedSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl SimilaritySearch for FixedSearch {
    async fn search(
        &self,
        _query: &SearchQuery,
        _signal: SignalType,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

pub struct FailingSearch;

#[async_trait]
impl SimilaritySearch for FailingSearch {
    async fn search(
        &self,
        _query: &SearchQuery,
        _signal: SignalType,
        _k: usize,
    ) -> Result<Vec<SearchHit>> {
        Err(anyhow!("connection refused"))
    }
}

/// Fails every call for `failing`; other signals get `hits`.
pub struct SignalFailingSearch {
    failing: SignalType,
    hits: Vec<SearchHit>,
}

impl SignalFailingSearch {
    pub fn new(failing: SignalType, hits: Vec<SearchHit>) -> Self {
        Self { failing, hits }
    }
}

#[async_trait]
impl SimilaritySearch for SignalFailingSearch {
    async fn search(
        &self,
        _query: &SearchQuery,
        signal: SignalType,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        if signal == self.failing {
            return Err(anyhow!("{} index offline", signal));
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// Stands in for a semantic cross-encoder: rates anything about
/// authentication as highly relevant, whatever words the query uses.
pub struct SynonymScorer;

impl RelevanceScorer for SynonymScorer {
    fn score(&self, _query: &str, document: &str) -> Result<f32> {
        Ok(if document.to_lowercase().contains("authentication") {
            0.95
        } else {
            0.05
        })
    }

    fn name(&self) -> &str {
        "synonym"
    }
}

pub fn options(use_hyde: bool, num_variations: usize) -> RunOptions {
    RunOptions {
        use_hyde,
        num_variations,
        retrieval_k: 20,
        rerank_k: 8,
        max_corrections: 2,
        timeout: Duration::from_secs(30),
    }
}

pub fn candidate(id: &str, text: &str, fused_rank: usize) -> Candidate {
    Candidate {
        chunk: ChunkRef::new(id, 0, text.len()),
        text: text.to_string(),
        variant_scores: BTreeMap::from([(0, 0.5)]),
        fused_score: 1.0 / (60.0 + fused_rank as f32),
        fused_rank,
    }
}

pub fn ranked(id: &str, text: &str, fused_rank: usize, rerank_score: f32) -> RankedCandidate {
    RankedCandidate {
        candidate: candidate(id, text, fused_rank),
        rerank_score,
    }
}

/// Evidence covering the whole of `text`.
pub fn evidence_span(id: &str, text: &str) -> EvidenceSpan {
    let chunk = ChunkRef::new(id, 0, text.len());
    EvidenceSpan::extract(&chunk, text, 0, text.len(), true)
        .unwrap_or_else(|| panic!("evidence text must slice cleanly: {text}"))
}

pub fn attempt(index: usize, answer: &str, quality: Option<f32>) -> GenerationAttempt {
    GenerationAttempt {
        index,
        prompt: String::new(),
        answer: answer.to_string(),
        evidence: Arc::from(Vec::<EvidenceSpan>::new()),
        score: quality.map(|q| ValidationScore::new(q, 1.0, Vec::new(), 0.7)),
    }
}
