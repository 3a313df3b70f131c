use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use pdf_rag_core::{
    ChromaStore, Chunker, ChunkerConfig, ContentType, EmbeddingClient, EmbeddingError,
    HashEmbedder, HttpEmbeddingClient, HttpGenerationClient, IndexOutcome, IndexingPipeline,
    LopdfExtractor, RagPipeline, RagStreamEvent, RetrieveOptions, Retriever, SimilarityChunker,
    StructuralChunker, VectorStore,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Chroma base URL
    #[arg(long, default_value = "http://localhost:8000")]
    store_url: String,

    /// Chroma collection name
    #[arg(long, default_value = "pdf_chunks")]
    collection: String,

    /// Embedding endpoint URL
    #[arg(long, default_value = "http://localhost:11434/api/embeddings")]
    embedding_url: String,

    /// Embedding model name
    #[arg(long, default_value = "mxbai-embed-large")]
    embedding_model: String,

    /// Embedding vector dimensions
    #[arg(long, default_value = "1024")]
    embedding_dimensions: usize,

    /// Use the deterministic in-process embedder instead of an HTTP endpoint
    #[arg(long, default_value_t = false)]
    local_embeddings: bool,

    /// Generation endpoint URL
    #[arg(long, default_value = "https://api.anthropic.com/v1/messages")]
    generation_url: String,

    /// Generation model name
    #[arg(long, default_value = "claude-3-5-sonnet-20241022")]
    generation_model: String,

    /// API key for the generation endpoint
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, chunk, embed, and store a PDF file or folder.
    Index {
        /// PDF file, or folder scanned recursively.
        path: String,
        /// Chunking strategy.
        #[arg(long, value_enum, default_value = "structural")]
        strategy: Strategy,
        /// Target chunk size in characters.
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        /// Overlap in characters for size-based splits.
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
        /// Minimum chunk size in characters.
        #[arg(long, default_value = "100")]
        min_chunk_size: usize,
        /// Breakpoint threshold for the similarity strategy.
        #[arg(long, default_value = "0.5")]
        similarity_threshold: f32,
        /// Sentences per comparison window for the similarity strategy.
        #[arg(long, default_value = "3")]
        buffer_size: usize,
    },
    /// Answer a question from the indexed documents, with citations.
    Query {
        /// Question text.
        question: String,
        /// Number of chunks to retrieve.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Minimum similarity score to keep a retrieved chunk.
        #[arg(long, default_value = "0.0")]
        min_score: f32,
        /// Restrict retrieval to these document ids.
        #[arg(long)]
        document_id: Vec<String>,
        /// Restrict retrieval to one content type (text, table, image, ...).
        #[arg(long)]
        content_type: Option<String>,
        /// Stream the answer as it is generated.
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Show collection statistics.
    Stats,
    /// Delete one document's chunks from the store.
    Delete {
        /// Document id to delete.
        document_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    Structural,
    Similarity,
}

fn build_embedder(cli: &Cli) -> Result<Arc<dyn EmbeddingClient + Send + Sync>, EmbeddingError> {
    if cli.local_embeddings {
        Ok(Arc::new(HashEmbedder::default()))
    } else {
        Ok(Arc::new(HttpEmbeddingClient::new(
            &cli.embedding_url,
            &cli.embedding_model,
            cli.embedding_dimensions,
        )?))
    }
}

fn print_outcome(outcome: &IndexOutcome) {
    if outcome.skipped {
        println!(
            "skipped {} ({})",
            outcome.filename,
            outcome.skip_reason.as_deref().unwrap_or("unknown")
        );
    } else {
        println!(
            "indexed {} document_id={} chunks={} pages={} in {:.2}s",
            outcome.filename,
            outcome.document_id.as_deref().unwrap_or("?"),
            outcome.chunks_created,
            outcome.pages,
            outcome.processing_seconds
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let store = ChromaStore::new(&cli.store_url, &cli.collection);
    let embedder = build_embedder(&cli).map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Index {
            path,
            strategy,
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            similarity_threshold,
            buffer_size,
        } => {
            let config = ChunkerConfig {
                chunk_size,
                chunk_overlap,
                min_chunk_size,
                ..ChunkerConfig::default()
            };
            let chunker: Box<dyn Chunker + Send + Sync> = match strategy {
                Strategy::Structural => Box::new(
                    StructuralChunker::new(config)
                        .map_err(|error| anyhow::anyhow!(error.to_string()))?,
                ),
                Strategy::Similarity => Box::new(
                    SimilarityChunker::new(
                        config,
                        similarity_threshold,
                        buffer_size,
                        Arc::clone(&embedder),
                    )
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?,
                ),
            };

            let pipeline = IndexingPipeline::new(
                LopdfExtractor::default(),
                chunker,
                Arc::clone(&embedder),
                store,
            );

            let target = Path::new(&path);
            if target.is_dir() {
                let report = pipeline
                    .index_folder(target)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                for failure in &report.failures {
                    warn!(path = %failure.path.display(), reason = %failure.reason, "failed pdf");
                }
                for outcome in &report.outcomes {
                    print_outcome(outcome);
                }
                println!(
                    "{} file(s) indexed, {} skipped, {} failed, {} chunks at {}",
                    report.indexed_count(),
                    report.skipped_count(),
                    report.failures.len(),
                    report.total_chunks(),
                    Utc::now().to_rfc3339()
                );
            } else {
                let outcome = pipeline
                    .index_file(target)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                print_outcome(&outcome);
            }
        }
        Command::Query {
            question,
            top_k,
            min_score,
            document_id,
            content_type,
            stream,
        } => {
            let content_type = match content_type {
                Some(name) => Some(
                    ContentType::from_name(&name)
                        .ok_or_else(|| anyhow::anyhow!("unknown content type: {name}"))?,
                ),
                None => None,
            };
            let options = RetrieveOptions {
                n_results: top_k,
                min_score,
                document_id: None,
                document_ids: if document_id.is_empty() {
                    None
                } else {
                    Some(document_id)
                },
                content_type,
            };

            let generation = HttpGenerationClient::new(
                &cli.generation_url,
                &cli.generation_model,
                cli.api_key.clone(),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let retriever = Retriever::new(store, Arc::clone(&embedder));
            let pipeline = RagPipeline::new(retriever, generation);

            if stream {
                let mut events = pipeline
                    .query_stream(&question, &options)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                while let Some(event) = events.next().await {
                    match event.map_err(|error| anyhow::anyhow!(error.to_string()))? {
                        RagStreamEvent::Delta(delta) => {
                            print!("{delta}");
                            io::stdout().flush()?;
                        }
                        RagStreamEvent::Done(response) => {
                            println!();
                            println!();
                            println!("sources:");
                            println!("{}", response.format_sources());
                        }
                    }
                }
            } else {
                let response = pipeline
                    .query(&question, &options)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;

                println!("{}", response.answer);
                println!();
                println!("sources:");
                println!("{}", response.format_sources());
                println!(
                    "model={} input_tokens={} output_tokens={} cost_usd={:.4}",
                    response.model,
                    response.input_tokens,
                    response.output_tokens,
                    response.estimated_cost_usd()
                );
            }
        }
        Command::Stats => {
            let total = store
                .count()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("collection={} chunks={}", cli.collection, total);
        }
        Command::Delete { document_id } => {
            let deleted = store
                .delete_document(&document_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("{deleted} chunk(s) deleted for document {document_id}");
        }
    }

    Ok(())
}
