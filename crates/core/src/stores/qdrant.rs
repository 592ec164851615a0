use crate::models::{
    ChunkField, ChunkMetadata, ChunkProjection, ChunkRecord, SimilarChunk, StoredChunk,
};
use crate::store::{assign_chunk_ids, validate_batch};
use crate::traits::ChunkIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

/// Chunk index on a Qdrant collection with cosine distance and a keyword index on
/// `document_id`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    ready: OnceCell<()>,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            ready: OnceCell::new(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, suffix)
    }

    /// Creates the collection and its payload index the first time the store is touched.
    async fn ensure_collection(&self) -> Result<(), SearchError> {
        self.ready
            .get_or_try_init(|| async {
                let existing = self.client.get(self.url("")).send().await?;
                if existing.status() == StatusCode::NOT_FOUND {
                    let created = self
                        .client
                        .put(self.url(""))
                        .json(&json!({
                            "vectors": { "size": self.vector_size, "distance": "Cosine" }
                        }))
                        .send()
                        .await?;
                    check(created).await?;

                    let indexed = self
                        .client
                        .put(self.url("/index?wait=true"))
                        .json(&json!({
                            "field_name": "document_id",
                            "field_schema": "keyword",
                        }))
                        .send()
                        .await?;
                    check(indexed).await?;
                    info!(collection = %self.collection, "created qdrant collection");
                } else {
                    check(existing).await?;
                }
                Ok::<(), SearchError>(())
            })
            .await
            .map(|_| ())
    }

    async fn count_matching(&self, filter: Option<Value>) -> Result<usize, SearchError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.url("/points/count"))
            .json(&body)
            .send()
            .await?;
        let parsed = check(response).await?.json::<Value>().await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| malformed("count response without result.count"))
    }
}

fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [{ "key": "document_id", "match": { "value": document_id } }]
    })
}

fn malformed(details: impl Into<String>) -> SearchError {
    SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: details.into(),
    }
}

async fn check(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(malformed(format!("{status}: {body}")))
}

/// Flat payload: chunk id, text and every metadata field at the top level.
fn point_payload(chunk_id: &str, record: &ChunkRecord) -> Result<Value, SearchError> {
    let mut payload = match serde_json::to_value(&record.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("chunk_id".to_string(), Value::from(chunk_id));
    payload.insert("text".to_string(), Value::from(record.text.as_str()));
    Ok(Value::Object(payload))
}

fn payload_parts(payload: &Value) -> Result<(String, String, ChunkMetadata), SearchError> {
    let chunk_id = payload
        .pointer("/chunk_id")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("point payload without chunk_id"))?
        .to_string();
    let text = payload
        .pointer("/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let metadata = serde_json::from_value::<ChunkMetadata>(payload.clone())?;
    Ok((chunk_id, text, metadata))
}

#[async_trait]
impl ChunkIndex for QdrantStore {
    async fn add(
        &self,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, SearchError> {
        if records.is_empty() {
            return Ok(0);
        }
        validate_batch(records, embeddings, Some(self.vector_size))?;
        self.ensure_collection().await?;

        let documents = records
            .iter()
            .map(|record| record.metadata.document_id.as_str())
            .collect::<BTreeSet<_>>();
        for document_id in documents {
            if self.count_matching(Some(document_filter(document_id))).await? > 0 {
                return Err(SearchError::Request(format!(
                    "document {document_id} already has chunks in the index"
                )));
            }
        }

        let points = records
            .iter()
            .zip(embeddings)
            .zip(assign_chunk_ids(records))
            .map(|((record, embedding), chunk_id)| -> Result<Value, SearchError> {
                Ok(json!({
                    "id": point_id(&chunk_id),
                    "vector": embedding,
                    "payload": point_payload(&chunk_id, record)?,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .client
            .put(self.url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        check(response).await?;

        info!(count = records.len(), collection = %self.collection, "upserted chunks");
        Ok(records.len())
    }

    async fn query_similar(
        &self,
        embedding: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SimilarChunk>, SearchError> {
        if embedding.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                embedding.len(),
                self.vector_size
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_collection().await?;

        let mut body = json!({
            "vector": embedding,
            "limit": k,
            "with_payload": true,
        });
        if let Some(document_id) = document_id {
            body["filter"] = document_filter(document_id);
        }

        let response = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .await?;
        let parsed = check(response).await?.json::<Value>().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        debug!(k, returned = hits.len(), "qdrant similarity query");

        hits.iter()
            .map(|hit| -> Result<SimilarChunk, SearchError> {
                let payload = hit
                    .pointer("/payload")
                    .ok_or_else(|| malformed("search hit without payload"))?;
                let (chunk_id, text, metadata) = payload_parts(payload)?;
                // Qdrant reports cosine similarity for Cosine collections.
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(SimilarChunk {
                    chunk_id,
                    text,
                    metadata,
                    distance: 1.0 - score,
                })
            })
            .collect()
    }

    async fn get_all(&self, fields: &[ChunkField]) -> Result<Vec<ChunkProjection>, SearchError> {
        self.ensure_collection().await?;

        let with_vector = fields.contains(&ChunkField::Embedding);
        let mut offset: Option<Value> = None;
        let mut projections = Vec::new();

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": with_vector,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let response = self
                .client
                .post(self.url("/points/scroll"))
                .json(&body)
                .send()
                .await?;
            let parsed = check(response).await?.json::<Value>().await?;

            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                let payload = point
                    .pointer("/payload")
                    .ok_or_else(|| malformed("scrolled point without payload"))?;
                let (chunk_id, text, metadata) = payload_parts(payload)?;
                let embedding = point
                    .pointer("/vector")
                    .map(|vector| serde_json::from_value::<Vec<f32>>(vector.clone()))
                    .transpose()?
                    .unwrap_or_default();
                let stored = StoredChunk {
                    chunk_id,
                    text,
                    embedding,
                    metadata,
                };
                projections.push(ChunkProjection::project(&stored, fields));
            }

            match parsed.pointer("/result/next_page_offset") {
                Some(next) if !next.is_null() => offset = Some(next.clone()),
                _ => break,
            }
        }

        Ok(projections)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        self.ensure_collection().await?;
        self.count_matching(None).await
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, SearchError> {
        self.ensure_collection().await?;

        let filter = document_filter(document_id);
        let removed = self.count_matching(Some(filter.clone())).await?;
        if removed == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.url("/points/delete?wait=true"))
            .json(&json!({ "filter": filter }))
            .send()
            .await?;
        check(response).await?;

        info!(document_id, removed, "deleted document points");
        Ok(removed)
    }
}
