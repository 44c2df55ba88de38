//! Command-line front end: answer a question over a directory of text files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use satya_rag::embeddings::HashingEmbedder;
use satya_rag::llm::{ollama, OllamaGenerator, TextGenerator};
use satya_rag::processing::TextChunker;
use satya_rag::rag::GeneratorRelevanceJudge;
use satya_rag::storage::{CorpusSearch, InMemoryCorpus};
use satya_rag::{Capabilities, PipelineConfig, QueryRequest, RAGPipeline};

#[derive(Parser, Debug)]
#[command(name = "satya", version, about = "Self-correcting RAG over a local corpus")]
struct Cli {
    /// Configuration file (JSON). Falls back to $SATYA_CONFIG, then the user config dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question and print the structured response as JSON
    Ask {
        /// Directory holding .txt and .md documents
        #[arg(long)]
        corpus: PathBuf,

        #[arg(long, default_value = ollama::DEFAULT_ENDPOINT)]
        endpoint: String,

        #[arg(short, long, default_value = ollama::DEFAULT_MODEL)]
        model: String,

        /// Skip the hypothetical-document variant
        #[arg(long)]
        no_hyde: bool,

        #[arg(long)]
        num_variations: Option<usize>,

        #[arg(long)]
        retrieval_k: Option<usize>,

        #[arg(long)]
        rerank_k: Option<usize>,

        #[arg(long)]
        max_corrections: Option<usize>,

        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Let the model rate answer relevance instead of term coverage
        #[arg(long)]
        llm_judge: bool,

        query: String,
    },
    /// Print how the corpus is chunked
    Chunks {
        #[arg(long)]
        corpus: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_file(path),
        None => PipelineConfig::from_env_or_default(),
    };
    config.map_err(anyhow::Error::msg)
}

fn load_corpus(dir: &Path, config: &PipelineConfig) -> Result<InMemoryCorpus> {
    let corpus = InMemoryCorpus::from_dir(dir, TextChunker::from_config(&config.chunking))
        .with_context(|| format!("Failed to load corpus from {}", dir.display()))?;
    if corpus.is_empty() {
        anyhow::bail!("no .txt or .md documents under {}", dir.display());
    }
    Ok(corpus)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask {
            corpus,
            endpoint,
            model,
            no_hyde,
            num_variations,
            retrieval_k,
            rerank_k,
            max_corrections,
            timeout_ms,
            llm_judge,
            query,
        } => {
            let corpus = Arc::new(load_corpus(&corpus, &config)?);
            let embedder = Arc::new(HashingEmbedder::default());
            let search = CorpusSearch::build(&corpus, embedder.as_ref()).await?;
            let generator: Arc<dyn TextGenerator> = Arc::new(OllamaGenerator::new(endpoint, model)?);

            let mut pipeline = RAGPipeline::new(
                config,
                Capabilities {
                    embedder,
                    generator: generator.clone(),
                    search: Arc::new(search),
                    corpus,
                },
            )?;
            if llm_judge {
                let judge = GeneratorRelevanceJudge::new(generator, pipeline.limits().clone());
                pipeline = pipeline.with_relevance_judge(Arc::new(judge));
            }

            let request = QueryRequest {
                query,
                use_hyde: no_hyde.then_some(false),
                num_variations,
                retrieval_k,
                rerank_k,
                max_corrections,
                timeout_ms,
            };
            let response = pipeline.run(&request).await?;
            tracing::debug!(metrics = ?pipeline.metrics().snapshot(), "Pipeline metrics");
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Chunks { corpus } => {
            let corpus = load_corpus(&corpus, &config)?;
            for stored in corpus.chunks() {
                let text = corpus.slice(&stored.chunk)?;
                println!(
                    "{}\t{}\t{}",
                    stored.chunk,
                    stored.heading.as_deref().unwrap_or("-"),
                    text.chars().take(80).collect::<String>().replace('\n', " ")
                );
            }
        }
    }

    Ok(())
}
