mod server;

use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_intel_core::{
    CharacterNgramEmbedder, ChunkIndex, DocumentService, Embedder, ExtractionArbiter,
    HttpOcrEngine, HybridRetriever, LocalIndex, LopdfExtractor, OcrEngine, OllamaEmbedder,
    OllamaGenerator, PatternEntityRecognizer, QdrantStore, RagOrchestrator, SearchQuery,
    SearchType, Settings,
};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-intel", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory where uploaded files are kept.
    #[arg(long, env = "DOC_INTEL_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// JSON snapshot of the local chunk index.
    #[arg(long, env = "DOC_INTEL_INDEX_PATH")]
    index_path: Option<PathBuf>,

    /// Qdrant base URL. When set, chunks are stored in Qdrant instead of the local index.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "doc_chunks")]
    qdrant_collection: String,

    /// Vector size reported by the Ollama embedding model.
    #[arg(long, env = "DOC_INTEL_EMBED_DIMENSIONS", default_value = "768")]
    embedding_dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one PDF or image file.
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ingest every supported file under a folder, recursively.
    IngestFolder {
        #[arg(long)]
        folder: PathBuf,
    },
    /// Search stored chunks.
    Search {
        #[arg(long)]
        query: String,
        /// semantic, keyword or hybrid; anything else falls back to semantic.
        #[arg(long, default_value = "semantic")]
        search_type: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Restrict results to one document id.
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Ask a question answered from the stored documents.
    Chat {
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "20")]
        top_k: usize,
        #[arg(long)]
        document_id: Option<String>,
    },
    /// List stored documents.
    Documents,
    /// Chunk and document totals.
    Stats,
    /// Delete a document and its chunks.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Run the HTTP API.
    Serve {
        #[arg(long, env = "DOC_INTEL_BIND", default_value = "127.0.0.1:8000")]
        bind: String,
        /// Browser origin allowed to call the API; repeatable. Replaces DOC_INTEL_CORS_ORIGINS.
        #[arg(long = "cors-origin")]
        cors_origins: Vec<String>,
    },
}

async fn build_state(cli: &Cli, settings: &Settings) -> anyhow::Result<AppState> {
    let embedder: Arc<dyn Embedder> = match &settings.embedding_model {
        Some(model) => Arc::new(OllamaEmbedder::new(
            &settings.ollama_url,
            model,
            cli.embedding_dimensions,
        )),
        None => Arc::new(CharacterNgramEmbedder::default()),
    };

    let index: Arc<dyn ChunkIndex> = match &cli.qdrant_url {
        Some(url) => Arc::new(QdrantStore::new(
            url,
            &cli.qdrant_collection,
            embedder.dimensions(),
        )),
        None => Arc::new(LocalIndex::open(&settings.index_path).await?),
    };

    let ocr: Option<Arc<dyn OcrEngine>> = match &settings.ocr {
        Some(config) => Some(Arc::new(HttpOcrEngine::new(config.clone()))),
        None => {
            warn!("LLM_OCR_ENDPOINT not set; scanned pages and images will have no text");
            None
        }
    };

    let recognizer = Arc::new(PatternEntityRecognizer::new()?);
    let arbiter = ExtractionArbiter::new(Arc::new(LopdfExtractor), ocr, settings.demo_ocr_pages);
    let documents = DocumentService::new(
        arbiter,
        index.clone(),
        embedder.clone(),
        recognizer.clone(),
        settings.ingestion_options(),
        &settings.upload_dir,
    );

    let retriever = Arc::new(
        HybridRetriever::new(index, embedder, recognizer)
            .with_semantic_weight(settings.semantic_weight),
    );
    let generator = Arc::new(OllamaGenerator::new(
        &settings.ollama_url,
        &settings.generation_model,
        settings.generation_timeout,
    ));
    let rag = RagOrchestrator::new(retriever.clone(), generator)
        .with_timeout(settings.generation_timeout);

    Ok(AppState {
        documents: Arc::new(documents),
        retriever,
        rag: Arc::new(rag),
        default_top_k: settings.top_k,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(dir) = &cli.upload_dir {
        settings.upload_dir = dir.clone();
    }
    if let Some(path) = &cli.index_path {
        settings.index_path = path.clone();
    }
    settings.validate()?;

    let state = build_state(&cli, &settings).await?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-intel boot"
    );

    match cli.command {
        Command::Ingest { file } => {
            let report = state.documents.ingest_file(&file).await?;
            println!("{}", report.message);
            println!("document_id={} chunks={}", report.id, report.total_chunks);
            for detail in &report.extraction_details {
                println!(
                    "  page {} method={} digital={} ocr={} blocks={}",
                    detail.page,
                    detail.primary_method,
                    detail.has_digital,
                    detail.has_ocr,
                    detail.block_count
                );
            }
            for group in &report.entities {
                println!("  {}: {}", group.label, group.values.join(", "));
            }
        }
        Command::IngestFolder { folder } => {
            let report = state.documents.ingest_folder(&folder).await?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            let chunks = report
                .ingested
                .iter()
                .map(|document| document.total_chunks)
                .sum::<usize>();
            println!(
                "{} documents ingested, {} chunks, {} skipped at {}",
                report.ingested.len(),
                chunks,
                report.skipped_files.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Search {
            query,
            search_type,
            top_k,
            document_id,
        } => {
            let response = state
                .retriever
                .search(&SearchQuery {
                    text: query,
                    search_type: SearchType::parse(&search_type),
                    top_k: top_k.unwrap_or(settings.top_k),
                    document_id,
                })
                .await?;

            println!(
                "query: {} ({}, {} results)",
                response.query,
                response.search_type.as_str(),
                response.total_results
            );
            for hit in response.results {
                println!(
                    "score={:.4} document_id={} file={} page={} method={}",
                    hit.score, hit.document_id, hit.filename, hit.page_number, hit.extraction_method
                );
                println!("  chunk_text:\n{}", hit.chunk_text);
                if !hit.entities.is_empty() {
                    let entities = hit
                        .entities
                        .iter()
                        .map(|entity| format!("{} [{}]", entity.text, entity.label))
                        .collect::<Vec<_>>();
                    println!("  entities: {}", entities.join(", "));
                }
            }
        }
        Command::Chat {
            question,
            top_k,
            document_id,
        } => {
            let answer = state
                .rag
                .ask(&question, top_k, document_id.as_deref())
                .await?;
            println!("{}", answer.answer);
            for (position, source) in answer.sources.iter().enumerate() {
                println!(
                    "  [Source {}: {}, Page {}] score={:.4}",
                    position + 1,
                    source.filename,
                    source.page_number,
                    source.score
                );
            }
        }
        Command::Documents => {
            for document in state.documents.list_documents().await? {
                println!(
                    "{} {} pages={} chunks={} uploaded={}",
                    document.id,
                    document.filename,
                    document.page_count,
                    document.chunk_count,
                    document.upload_date
                );
            }
        }
        Command::Stats => {
            let stats = state.documents.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Delete { id } => {
            let removed = state.documents.delete_document(&id).await?;
            println!("Document {id} deleted ({removed} chunks removed).");
        }
        Command::Serve { bind, cors_origins } => {
            let origins = if cors_origins.is_empty() {
                settings.cors_origins.clone()
            } else {
                cors_origins
            };
            server::serve(state, &bind, &origins).await?;
        }
    }

    Ok(())
}
