use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported file type '{extension}'. Accepted: {accepted}")]
    UnsupportedFileType { extension: String, accepted: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Index(#[from] SearchError),
}

impl IngestError {
    /// Validation failures the caller can fix; everything else is a processing failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedFileType { .. }
                | IngestError::MissingFileName(_)
                | IngestError::InvalidArgument(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding backend failed: {0}")]
    Embedding(String),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl SearchError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::InvalidQuery(_))
    }
}

/// Failure classes of the answer-generation backend. Each maps to its own canned reply.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("answer backend unreachable: {0}")]
    Unreachable(String),

    #[error("answer backend timed out after {0} seconds")]
    Timeout(u64),

    #[error("answer backend transport error: {0}")]
    Transport(String),

    #[error("malformed answer backend response: {0}")]
    Malformed(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
