pub mod arbiter;
pub mod bm25;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod entities;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod rag;
pub mod store;
pub mod stores;
pub mod traits;

pub use arbiter::{ExtractionArbiter, DIGITAL_TEXT_MIN_CHARS};
pub use bm25::Bm25Index;
pub use chunking::{build_chunk_records, chunk_text, ChunkingConfig};
pub use config::{OcrEndpointConfig, Settings};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use entities::{EntityRecognizer, PatternEntityRecognizer};
pub use error::{GenerationError, IngestError, SearchError};
pub use extractor::{DigitalPage, HttpOcrEngine, LopdfExtractor, OcrEngine, OcrOutput, PdfExtractor};
pub use generation::{AnswerGenerator, OllamaGenerator};
pub use ingest::{discover_supported_files, DocumentService, FolderIngestionReport, SkippedFile};
pub use models::{
    ChatAnswer, ChatOutcome, ChunkField, ChunkMetadata, ChunkProjection, ChunkRecord, Document,
    DocumentInfo, Entity, EntityGroup, ExtractionMethod, FileType, IndexStats, IngestionOptions,
    IngestionReport, Page, PageExtractionDetail, SearchQuery, SearchResponse, SearchResult,
    SearchType, SimilarChunk, StoredChunk, TextBlock,
};
pub use orchestrator::{fuse_results, HybridRetriever};
pub use rag::{RagOrchestrator, RELEVANCE_FLOOR};
pub use stores::{LocalIndex, QdrantStore};
pub use traits::ChunkIndex;
