use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const PDF_EXTENSIONS: [&str; 1] = ["pdf"];
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Image,
}

impl FileType {
    /// Resolves the file type from the extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if PDF_EXTENSIONS.contains(&extension.as_str()) {
            Some(FileType::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Some(FileType::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Image => "image",
        }
    }
}

/// Sorted, dot-prefixed allow-list for error messages.
pub fn accepted_extensions() -> String {
    let mut all = PDF_EXTENSIONS
        .iter()
        .chain(IMAGE_EXTENSIONS.iter())
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>();
    all.sort();
    all.join(", ")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Digital,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Digital => "digital",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub filename: String,
    pub page_count: u32,
    pub file_type: FileType,
    pub upload_timestamp: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub bounding_box: [f32; 4],
    pub font_size: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub index: usize,
    pub kind: BlockKind,
    pub bounding_box: [f32; 4],
    pub lines: Vec<TextLine>,
}

/// Per-page extraction outcome. Lives only for the duration of one ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub primary_text: String,
    pub extraction_method: ExtractionMethod,
    pub digital_text: Option<String>,
    pub ocr_text: Option<String>,
    pub text_blocks: Option<Vec<TextBlock>>,
    pub preprocessing_steps: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub filename: String,
    pub page_number: u32,
    pub page_count: u32,
    pub extraction_method: ExtractionMethod,
    pub file_type: FileType,
    pub upload_timestamp: DateTime<Utc>,
}

/// A chunk ready for embedding and insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkField {
    Text,
    Embedding,
    Metadata,
}

/// A stored chunk projected to the fields a caller asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkProjection {
    pub chunk_id: String,
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<ChunkMetadata>,
}

impl ChunkProjection {
    pub fn project(chunk: &StoredChunk, fields: &[ChunkField]) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            text: fields
                .contains(&ChunkField::Text)
                .then(|| chunk.text.clone()),
            embedding: fields
                .contains(&ChunkField::Embedding)
                .then(|| chunk.embedding.clone()),
            metadata: fields
                .contains(&ChunkField::Metadata)
                .then(|| chunk.metadata.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query vector.
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub document_id: String,
    pub filename: String,
    pub chunk_text: String,
    pub page_number: u32,
    pub score: f64,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl SearchResult {
    pub fn from_parts(text: String, metadata: &ChunkMetadata, score: f64) -> Self {
        Self {
            document_id: metadata.document_id.clone(),
            filename: metadata.filename.clone(),
            chunk_text: text,
            page_number: metadata.page_number,
            score,
            extraction_method: metadata.extraction_method,
            entities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Semantic,
    Keyword,
    Hybrid,
}

impl SearchType {
    /// Unknown selectors fall back to semantic search.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => SearchType::Keyword,
            "hybrid" => SearchType::Hybrid,
            _ => SearchType::Semantic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Semantic => "semantic",
            SearchType::Keyword => "keyword",
            SearchType::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub search_type: SearchType,
    pub top_k: usize,
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub search_type: SearchType,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityGroup {
    pub label: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtractionDetail {
    pub page: u32,
    pub primary_method: ExtractionMethod,
    pub has_digital: bool,
    pub has_ocr: bool,
    pub digital_preview: String,
    pub ocr_preview: String,
    pub block_count: usize,
    pub preprocessing_steps: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub id: String,
    pub filename: String,
    pub page_count: u32,
    pub total_chunks: usize,
    /// SHA-256 of the uploaded bytes.
    pub checksum: String,
    pub status: String,
    pub extracted_text_preview: String,
    pub entities: Vec<EntityGroup>,
    pub extraction_details: Vec<PageExtractionDetail>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    pub page_count: u32,
    pub upload_date: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub total_documents: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatOutcome {
    Answered,
    BackendUnavailable,
    NoContext,
    Timeout,
    TransportError,
    MalformedResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub outcome: ChatOutcome,
}

/// Ingestion tuning shared by the arbiter and the chunker.
#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub demo_ocr_pages: u32,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            demo_ocr_pages: 3,
        }
    }
}
