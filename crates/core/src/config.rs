use crate::error::SearchError;
use crate::models::IngestionOptions;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_GENERATION_MODEL: &str = "tinyllama";
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;
/// Dev servers of the web frontend.
pub const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://localhost:3000"];

/// Endpoint of the multimodal OCR service.
#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub upload_dir: PathBuf,
    pub index_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub demo_ocr_pages: u32,
    pub top_k: usize,
    pub semantic_weight: f64,
    pub ollama_url: String,
    pub generation_model: String,
    pub embedding_model: Option<String>,
    pub generation_timeout: Duration,
    pub ocr: Option<OcrEndpointConfig>,
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let options = IngestionOptions::default();
        Self {
            upload_dir: PathBuf::from("./data/uploads"),
            index_path: PathBuf::from("./data/index.json"),
            chunk_size: options.chunk_size,
            chunk_overlap: options.chunk_overlap,
            demo_ocr_pages: options.demo_ocr_pages,
            top_k: 10,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_model: None,
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            ocr: None,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|origin| origin.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `DOC_INTEL_*`, `OLLAMA_*` and `LLM_OCR_*` variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(dir) = env_string("DOC_INTEL_UPLOAD_DIR") {
            settings.upload_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("DOC_INTEL_INDEX_PATH") {
            settings.index_path = PathBuf::from(path);
        }
        if let Some(size) = env_parse("DOC_INTEL_CHUNK_SIZE") {
            settings.chunk_size = size;
        }
        if let Some(overlap) = env_parse("DOC_INTEL_CHUNK_OVERLAP") {
            settings.chunk_overlap = overlap;
        }
        if let Some(pages) = env_parse("DOC_INTEL_DEMO_OCR_PAGES") {
            settings.demo_ocr_pages = pages;
        }
        if let Some(top_k) = env_parse("DOC_INTEL_TOP_K") {
            settings.top_k = top_k;
        }
        if let Some(weight) = env_parse::<f64>("DOC_INTEL_SEMANTIC_WEIGHT") {
            settings.semantic_weight = weight.clamp(0.0, 1.0);
        }
        if let Some(url) = env_string("OLLAMA_BASE_URL") {
            settings.ollama_url = url;
        }
        if let Some(model) = env_string("OLLAMA_MODEL") {
            settings.generation_model = model;
        }
        settings.embedding_model = env_string("OLLAMA_EMBED_MODEL");
        if let Some(secs) = env_parse("DOC_INTEL_GEN_TIMEOUT_SECS") {
            settings.generation_timeout = Duration::from_secs(secs);
        }
        settings.ocr = env_string("LLM_OCR_ENDPOINT").map(|endpoint| OcrEndpointConfig {
            endpoint,
            api_key: env_string("LLM_OCR_API_KEY"),
        });
        if let Some(origins) = env_string("DOC_INTEL_CORS_ORIGINS") {
            settings.cors_origins = split_origins(&origins);
        }

        settings
    }

    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            demo_ocr_pages: self.demo_ocr_pages,
        }
    }

    /// Rejects malformed base URLs before any client is built.
    pub fn validate(&self) -> Result<(), SearchError> {
        Url::parse(&self.ollama_url)?;
        if let Some(ocr) = &self.ocr {
            Url::parse(&ocr.endpoint)?;
        }
        if self.chunk_size == 0 {
            return Err(SearchError::Request("chunk size must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Comma-separated origin list; blank entries are skipped.
pub fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse().ok())
}
