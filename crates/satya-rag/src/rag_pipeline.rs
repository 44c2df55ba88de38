use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::embeddings::{CachedEmbedder, TextEmbedder};
use crate::error::{PipelineError, PipelineResult};
use crate::limits::ServiceLimits;
use crate::llm::TextGenerator;
use crate::metrics::PipelineMetrics;
use crate::rag::context_compressor::ContextCompressor;
use crate::rag::corrector::{best_attempt, CorrectionDecision, CorrectionFeedback, Corrector};
use crate::rag::generator::AnswerGenerator;
use crate::rag::query_expander::QueryExpander;
use crate::rag::retriever::Retriever;
use crate::rag::validator::{AnswerValidator, LexicalRelevanceJudge, RelevanceJudge};
use crate::reranking::{LexicalCrossScorer, RelevanceScorer, Reranker};
use crate::search::SimilaritySearch;
use crate::storage::CorpusReader;
use crate::types::{
    Candidate, ErrorKind, EvidenceSpan, FailureDetail, GenerationAttempt, PipelineResponse,
    Query, QueryRequest, QueryVariant, RankedCandidate, RunDiagnostics, RunStatus, SourceRef,
    Stage, ValidationScore, VariantSummary,
};

/// External services the pipeline calls.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn TextEmbedder>,
    pub generator: Arc<dyn TextGenerator>,
    pub search: Arc<dyn SimilaritySearch>,
    pub corpus: Arc<dyn CorpusReader>,
}

/// Self-correcting retrieval-augmented answering.
///
/// One instance serves any number of concurrent runs. The only state shared
/// between runs is the embedding cache, the service limits and the metrics.
pub struct RAGPipeline {
    config: PipelineConfig,
    expander: QueryExpander,
    retriever: Retriever,
    reranker: Reranker,
    compressor: ContextCompressor,
    answerer: AnswerGenerator,
    validator: AnswerValidator,
    embeddings: Arc<CachedEmbedder>,
    limits: ServiceLimits,
    metrics: PipelineMetrics,
}

enum State {
    Expand,
    Retrieve(Vec<QueryVariant>),
    Rerank(Vec<Candidate>),
    Compress(Vec<RankedCandidate>),
    Generate(Option<CorrectionFeedback>),
    Validate(usize),
    Correct(CorrectionFeedback),
}

enum Outcome {
    Accept,
    AbortWithBest,
    Failed(FailureDetail),
}

/// Run-scoped state. Dropped once the response is built.
struct PipelineRun {
    query: Query,
    deadline: Instant,
    started: Instant,
    evidence: Arc<[EvidenceSpan]>,
    attempts: Vec<GenerationAttempt>,
    diagnostics: RunDiagnostics,
}

impl PipelineRun {
    fn timed_out(&self, stage: Stage) -> Outcome {
        let timeout_ms = self.query.options().timeout.as_millis() as u64;
        tracing::warn!(stage = %stage, timeout_ms, attempts = self.attempts.len(), "Run deadline exceeded");
        if self.attempts.is_empty() {
            Outcome::Failed(PipelineError::Timeout { stage, timeout_ms }.into_failure(stage))
        } else {
            Outcome::AbortWithBest
        }
    }
}

fn task_failure(stage: Stage, error: tokio::task::JoinError) -> Outcome {
    tracing::error!(stage = %stage, error = %error, "Stage task did not complete");
    Outcome::Failed(FailureDetail {
        stage,
        kind: ErrorKind::RetrievalFailure,
        message: format!("{} task did not complete: {}", stage, error),
    })
}

impl RAGPipeline {
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> PipelineResult<Self> {
        config.validate().map_err(PipelineError::config)?;

        let limits = ServiceLimits::new(&config.concurrency);
        let scorer: Arc<dyn RelevanceScorer> = Arc::new(LexicalCrossScorer::new());
        let embeddings = Arc::new(CachedEmbedder::new(
            capabilities.embedder,
            config.concurrency.embedding_cache_size,
        ));

        tracing::info!(
            generator = capabilities.generator.name(),
            retrieval_k = config.retrieval.retrieval_k,
            rerank_k = config.reranking.rerank_k,
            max_corrections = config.correction.max_corrections,
            "RAG pipeline initialised"
        );

        Ok(Self {
            expander: QueryExpander::new(
                capabilities.generator.clone(),
                limits.clone(),
                config.expansion.clone(),
            ),
            retriever: Retriever::new(
                capabilities.search,
                embeddings.clone(),
                capabilities.corpus,
                limits.clone(),
                config.retrieval.clone(),
            ),
            reranker: Reranker::new(scorer.clone()),
            compressor: ContextCompressor::new(config.compression.clone(), scorer),
            answerer: AnswerGenerator::new(
                capabilities.generator,
                limits.clone(),
                config.generation.clone(),
            ),
            validator: AnswerValidator::new(
                Arc::new(LexicalRelevanceJudge),
                config.validation.clone(),
            ),
            embeddings,
            limits,
            metrics: PipelineMetrics::new(),
            config,
        })
    }

    /// Replace the relevance scorer. Reranking and evidence selection both
    /// use it.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.reranker = Reranker::new(scorer.clone());
        self.compressor = ContextCompressor::new(self.config.compression.clone(), scorer);
        self
    }

    pub fn with_relevance_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.validator = AnswerValidator::new(judge, self.config.validation.clone());
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn embedding_cache(&self) -> &Arc<CachedEmbedder> {
        &self.embeddings
    }

    /// Concurrency caps shared by every run. Hand these to any custom judge
    /// or scorer that calls the same services.
    pub fn limits(&self) -> &ServiceLimits {
        &self.limits
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Answer one request. Every run outcome, including failures, comes back
    /// as a `PipelineResponse`; `Err` only means the request itself was invalid.
    pub async fn run(&self, request: &QueryRequest) -> PipelineResult<PipelineResponse> {
        let query = self.config.resolve(request)?;
        Ok(self.execute(query).await)
    }

    pub async fn execute(&self, query: Query) -> PipelineResponse {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", run_id = %run_id);
        self.execute_run(query, run_id).instrument(span).await
    }

    async fn execute_run(&self, query: Query, run_id: Uuid) -> PipelineResponse {
        let _active = self.metrics.start_run();
        let started = Instant::now();
        let mut run = PipelineRun {
            deadline: started + query.options().timeout,
            started,
            evidence: Arc::from(Vec::<EvidenceSpan>::new()),
            attempts: Vec::new(),
            diagnostics: RunDiagnostics::new(run_id),
            query,
        };
        tracing::info!(query = %run.query.text(), "Pipeline run started");

        let corrector = Corrector::new(
            self.config.validation.acceptance_threshold,
            run.query.options().max_corrections,
        );

        let mut state = State::Expand;
        let outcome = loop {
            state = match state {
                State::Expand => {
                    let t = Instant::now();
                    let expansion =
                        match timeout_at(run.deadline, self.expander.expand(&run.query)).await {
                            Ok(expansion) => expansion,
                            Err(_) => break run.timed_out(Stage::Expand),
                        };
                    run.diagnostics.record_stage(Stage::Expand, t.elapsed());
                    run.diagnostics.expansion_failures = expansion.failures.len();
                    run.diagnostics.hyde_used = expansion.hyde_used();
                    run.diagnostics.variants = expansion
                        .variants
                        .iter()
                        .map(|v| VariantSummary {
                            tag: v.tag(),
                            text: v.text().to_string(),
                        })
                        .collect();
                    State::Retrieve(expansion.variants)
                }

                State::Retrieve(variants) => {
                    let t = Instant::now();
                    let retrieval_k = run.query.options().retrieval_k;
                    let result = match timeout_at(
                        run.deadline,
                        self.retriever.retrieve(&variants, retrieval_k),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => break run.timed_out(Stage::Retrieve),
                    };
                    run.diagnostics.record_stage(Stage::Retrieve, t.elapsed());
                    match result {
                        Ok(retrieval) => {
                            run.diagnostics.documents_retrieved = retrieval.candidates.len();
                            State::Rerank(retrieval.candidates)
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Retrieval failed");
                            break Outcome::Failed(e.into_failure(Stage::Retrieve));
                        }
                    }
                }

                State::Rerank(candidates) => {
                    let t = Instant::now();
                    let reranker = self.reranker.clone();
                    let query = run.query.text().to_string();
                    let rerank_k = run.query.options().rerank_k;
                    let task = tokio::task::spawn_blocking(move || {
                        reranker.rerank(&query, candidates, rerank_k)
                    });
                    let ranked = match timeout_at(run.deadline, task).await {
                        Ok(Ok(ranked)) => ranked,
                        Ok(Err(e)) => break task_failure(Stage::Rerank, e),
                        Err(_) => break run.timed_out(Stage::Rerank),
                    };
                    run.diagnostics.record_stage(Stage::Rerank, t.elapsed());
                    if ranked.is_empty() {
                        break Outcome::Failed(FailureDetail {
                            stage: Stage::Rerank,
                            kind: ErrorKind::RetrievalFailure,
                            message: "no candidate could be scored".to_string(),
                        });
                    }
                    run.diagnostics.documents_after_rerank = ranked.len();
                    State::Compress(ranked)
                }

                State::Compress(ranked) => {
                    let t = Instant::now();
                    let compressor = self.compressor.clone();
                    let query = run.query.text().to_string();
                    let task =
                        tokio::task::spawn_blocking(move || compressor.compress(&query, &ranked));
                    let context = match timeout_at(run.deadline, task).await {
                        Ok(Ok(context)) => context,
                        Ok(Err(e)) => break task_failure(Stage::Compress, e),
                        Err(_) => break run.timed_out(Stage::Compress),
                    };
                    run.diagnostics.record_stage(Stage::Compress, t.elapsed());
                    run.diagnostics.documents_after_compression = context.kept_candidates.len();
                    run.diagnostics.compression_ratio = context.compression_ratio();
                    if context.is_empty() {
                        break Outcome::Failed(FailureDetail {
                            stage: Stage::Compress,
                            kind: ErrorKind::RetrievalFailure,
                            message: "no relevant evidence in any candidate".to_string(),
                        });
                    }
                    run.evidence = context.evidence.into();
                    State::Generate(None)
                }

                State::Generate(feedback) => {
                    let t = Instant::now();
                    let index = run.attempts.len();
                    let result = match timeout_at(
                        run.deadline,
                        self.answerer.generate(
                            run.query.text(),
                            run.evidence.clone(),
                            feedback.as_ref(),
                            index,
                        ),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => break run.timed_out(Stage::Generate),
                    };
                    run.diagnostics.record_stage(Stage::Generate, t.elapsed());
                    match result {
                        Ok(attempt) => {
                            run.attempts.push(attempt);
                            State::Validate(index)
                        }
                        Err(e) if run.attempts.is_empty() => {
                            tracing::error!(error = %e, "Generation failed");
                            break Outcome::Failed(e.into_failure(Stage::Generate));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Correction attempt failed, returning best earlier attempt");
                            break Outcome::AbortWithBest;
                        }
                    }
                }

                State::Validate(index) => {
                    let t = Instant::now();
                    let attempt = &run.attempts[index];
                    let score = match timeout_at(
                        run.deadline,
                        self.validator
                            .validate(run.query.text(), &attempt.answer, &attempt.evidence),
                    )
                    .await
                    {
                        Ok(score) => score,
                        Err(_) => break run.timed_out(Stage::Validate),
                    };
                    run.diagnostics.record_stage(Stage::Validate, t.elapsed());
                    run.diagnostics.attempt_scores.push(score.overall_quality);

                    let decision = corrector.decide(&attempt.answer, &score, index);
                    run.attempts[index].score = Some(score);
                    match decision {
                        CorrectionDecision::Accept => break Outcome::Accept,
                        CorrectionDecision::AbortWithBest => break Outcome::AbortWithBest,
                        CorrectionDecision::Correct(feedback) => State::Correct(feedback),
                    }
                }

                State::Correct(feedback) => {
                    tracing::info!(
                        attempt = run.attempts.len(),
                        flagged = feedback.flagged_claims.len(),
                        groundedness = feedback.groundedness,
                        relevance = feedback.relevance,
                        "Regenerating with validator feedback"
                    );
                    State::Generate(Some(feedback))
                }
            };
        };

        self.finish(run, outcome)
    }

    fn finish(&self, run: PipelineRun, outcome: Outcome) -> PipelineResponse {
        let PipelineRun {
            query,
            started,
            attempts,
            mut diagnostics,
            ..
        } = run;
        diagnostics.processing_time_ms = started.elapsed().as_millis() as u64;
        let corrections_applied = attempts.len().saturating_sub(1);

        let (status, failure) = match outcome {
            Outcome::Accept => (RunStatus::Accept, None),
            Outcome::AbortWithBest => (RunStatus::AbortWithBest, None),
            Outcome::Failed(detail) => (RunStatus::Failed, Some(detail)),
        };

        let best = match status {
            RunStatus::Failed => None,
            _ => best_attempt(&attempts),
        };
        let (response, validation_scores, sources) = match best {
            Some(attempt) => (
                attempt.answer.clone(),
                attempt.score.clone().unwrap_or_else(ValidationScore::unscored),
                attempt.evidence.iter().map(SourceRef::from).collect(),
            ),
            None => (String::new(), ValidationScore::unscored(), Vec::new()),
        };

        self.metrics.record_run(
            status,
            started.elapsed(),
            corrections_applied,
            diagnostics.documents_retrieved,
        );

        match &failure {
            Some(detail) => tracing::error!(
                stage = %detail.stage,
                kind = ?detail.kind,
                message = %detail.message,
                elapsed_ms = diagnostics.processing_time_ms,
                "Pipeline run failed"
            ),
            None => tracing::info!(
                status = ?status,
                overall = validation_scores.overall_quality,
                corrections = corrections_applied,
                elapsed_ms = diagnostics.processing_time_ms,
                "Pipeline run finished"
            ),
        }

        PipelineResponse {
            query: query.text().to_string(),
            response,
            fully_validated: status == RunStatus::Accept,
            validation_scores,
            corrections_applied,
            sources,
            status,
            failure,
            metadata: diagnostics,
        }
    }
}
