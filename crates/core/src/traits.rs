use crate::models::{ChunkField, ChunkProjection, ChunkRecord, SimilarChunk};
use crate::SearchError;
use async_trait::async_trait;

/// Document-scoped store of (chunk text, embedding, metadata) triples.
///
/// Writes for one document are all-or-nothing: a concurrent reader sees every chunk of a
/// document or none of them.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Inserts a batch, assigning `"{document_id}_chunk_{ordinal}"` ids. Returns the count.
    async fn add(
        &self,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, SearchError>;

    /// Up to `k` chunks by ascending cosine distance, optionally restricted to chunks whose
    /// `document_id` equals `document_id` exactly.
    async fn query_similar(
        &self,
        embedding: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SimilarChunk>, SearchError>;

    async fn get_all(&self, fields: &[ChunkField]) -> Result<Vec<ChunkProjection>, SearchError>;

    async fn count(&self) -> Result<usize, SearchError>;

    /// Removes every chunk of the document and returns how many were removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, SearchError>;
}
