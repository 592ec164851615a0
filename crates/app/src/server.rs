use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use doc_intel_core::{
    ChatAnswer, DocumentInfo, DocumentService, HybridRetriever, IndexStats, IngestError,
    IngestionReport, RagOrchestrator, SearchError, SearchQuery, SearchResponse, SearchType,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_CHAT_TOP_K: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentService>,
    pub retriever: Arc<HybridRetriever>,
    pub rag: Arc<RagOrchestrator>,
    pub default_top_k: usize,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        if error.is_client_error() {
            ApiError::BadRequest(error.to_string())
        } else {
            ApiError::Internal(format!("Processing failed: {error}"))
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(error: SearchError) -> Self {
        if error.is_client_error() {
            ApiError::BadRequest(error.to_string())
        } else {
            ApiError::Internal(error.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Internal(detail) => {
                warn!(%detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub document_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub document_id: Option<String>,
}

/// Allows browser calls from the listed origins; unparsable origins are logged and skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%origin, %error, "invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/documents/upload", post(upload_document))
        .route("/api/documents/", get(list_documents))
        .route("/api/documents/stats", get(document_stats))
        .route("/api/documents/:doc_id", delete(delete_document))
        .route("/api/search/", post(search_documents))
        .route("/api/chat/", post(ask_question))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str, cors_origins: &[String]) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, origins = ?cors_origins, "http api listening");
    axum::serve(listener, router(state, cors_layer(cors_origins))).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestionReport>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::BadRequest(format!("Multipart error: {error}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("uploaded file has no name".to_string()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::BadRequest(format!("Read error: {error}")))?;

        let report = state.documents.ingest_upload(&filename, &bytes).await?;
        return Ok(Json(report));
    }

    Err(ApiError::BadRequest("missing multipart field 'file'".to_string()))
}

async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentInfo>>, ApiError> {
    Ok(Json(state.documents.list_documents().await?))
}

async fn document_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(state.documents.stats().await?))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.documents.delete_document(&doc_id).await?;
    Ok(Json(json!({ "message": format!("Document {doc_id} deleted.") })))
}

async fn search_documents(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = SearchQuery {
        text: request.query,
        search_type: request
            .search_type
            .as_deref()
            .map(SearchType::parse)
            .unwrap_or_default(),
        top_k: request.top_k.unwrap_or(state.default_top_k),
        document_id: request.document_id,
    };
    Ok(Json(state.retriever.search(&query).await?))
}

/// Backend trouble during generation still answers 200 with an explanatory message.
async fn ask_question(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let answer = state
        .rag
        .ask(
            &request.question,
            request.top_k.unwrap_or(DEFAULT_CHAT_TOP_K),
            request.document_id.as_deref(),
        )
        .await?;
    Ok(Json(answer))
}
