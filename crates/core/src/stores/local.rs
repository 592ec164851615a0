//! In-process chunk index behind a `tokio::sync::RwLock`, optionally mirrored to a JSON
//! snapshot file.
//!
//! Writers hold the write lock for the whole batch (including the snapshot write), so a reader
//! observes a document either with all of its chunks or with none of them.

use crate::models::{ChunkField, ChunkProjection, ChunkRecord, SimilarChunk, StoredChunk};
use crate::store::{assign_chunk_ids, cosine_distance, validate_batch};
use crate::traits::ChunkIndex;
use crate::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    dimension: Option<usize>,
    chunks: Vec<StoredChunk>,
}

#[derive(Debug, Default)]
pub struct LocalIndex {
    state: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl LocalIndex {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the snapshot at `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SearchError> {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(error) => return Err(error.into()),
        };

        info!(
            path = %path.display(),
            chunks = snapshot.chunks.len(),
            "opened local chunk index"
        );

        Ok(Self {
            state: RwLock::new(snapshot),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), SearchError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, serde_json::to_vec(snapshot)?).await?;
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkIndex for LocalIndex {
    async fn add(
        &self,
        records: &[ChunkRecord],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, SearchError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        validate_batch(records, embeddings, state.dimension)?;

        let ids = assign_chunk_ids(records);
        let existing = state
            .chunks
            .iter()
            .map(|chunk| chunk.chunk_id.as_str())
            .collect::<HashSet<_>>();
        if let Some(duplicate) = ids.iter().find(|id| existing.contains(id.as_str())) {
            return Err(SearchError::Request(format!(
                "chunk id {duplicate} already exists"
            )));
        }

        let mut next = state.clone();
        next.dimension = next.dimension.or_else(|| embeddings.first().map(Vec::len));
        next.chunks.extend(
            records
                .iter()
                .zip(embeddings)
                .zip(ids)
                .map(|((record, embedding), chunk_id)| StoredChunk {
                    chunk_id,
                    text: record.text.clone(),
                    embedding: embedding.clone(),
                    metadata: record.metadata.clone(),
                }),
        );

        self.persist(&next).await?;
        *state = next;

        info!(count = records.len(), "added chunks to local index");
        Ok(records.len())
    }

    async fn query_similar(
        &self,
        embedding: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SimilarChunk>, SearchError> {
        let state = self.state.read().await;

        if let Some(dimension) = state.dimension {
            if dimension != embedding.len() {
                return Err(SearchError::Request(format!(
                    "query vector dim {} is not {}",
                    embedding.len(),
                    dimension
                )));
            }
        }

        let mut scored = state
            .chunks
            .iter()
            .filter(|chunk| document_id.map_or(true, |id| chunk.metadata.document_id == id))
            .map(|chunk| (chunk, cosine_distance(&chunk.embedding, embedding)))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1));
        scored.truncate(k);

        debug!(
            k,
            filter = document_id.unwrap_or("<none>"),
            returned = scored.len(),
            "local similarity query"
        );

        Ok(scored
            .into_iter()
            .map(|(chunk, distance)| SimilarChunk {
                chunk_id: chunk.chunk_id.clone(),
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                distance,
            })
            .collect())
    }

    async fn get_all(&self, fields: &[ChunkField]) -> Result<Vec<ChunkProjection>, SearchError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .iter()
            .map(|chunk| ChunkProjection::project(chunk, fields))
            .collect())
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.state.read().await.chunks.len())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, SearchError> {
        let mut state = self.state.write().await;

        let removed = state
            .chunks
            .iter()
            .filter(|chunk| chunk.metadata.document_id == document_id)
            .count();
        if removed == 0 {
            return Ok(0);
        }

        let chunks = state
            .chunks
            .iter()
            .filter(|chunk| chunk.metadata.document_id != document_id)
            .cloned()
            .collect::<Vec<_>>();
        let next = Snapshot {
            dimension: if chunks.is_empty() { None } else { state.dimension },
            chunks,
        };

        self.persist(&next).await?;
        *state = next;

        info!(document_id, removed, "deleted document chunks");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ExtractionMethod, FileType};
    use std::sync::Arc;

    fn record(document_id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            text: text.to_string(),
            metadata: ChunkMetadata {
                document_id: document_id.to_string(),
                filename: format!("{document_id}.pdf"),
                page_number: 1,
                page_count: 1,
                extraction_method: ExtractionMethod::Digital,
                file_type: FileType::Pdf,
                upload_timestamp: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() -> Result<(), SearchError> {
        let index = LocalIndex::in_memory();
        index
            .add(
                &[record("d", "far"), record("d", "near"), record("d", "middle")],
                &[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]],
            )
            .await?;

        let hits = index.query_similar(&[1.0, 0.0], 3, None).await?;

        let texts = hits.iter().map(|hit| hit.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["near", "middle", "far"]);
        assert_eq!(hits[0].chunk_id, "d_chunk_1");
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        Ok(())
    }

    #[tokio::test]
    async fn document_filter_uses_exact_equality() -> Result<(), SearchError> {
        let index = LocalIndex::in_memory();
        index
            .add(
                &[record("doc1", "one"), record("doc10", "ten")],
                &[vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .await?;

        let hits = index.query_similar(&[1.0, 0.0], 10, Some("doc1")).await?;

        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|hit| hit.metadata.document_id == "doc1"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<(), SearchError> {
        let index = LocalIndex::in_memory();
        index
            .add(
                &[record("X", "a"), record("Y", "b"), record("X", "c")],
                &[vec![1.0], vec![1.0], vec![1.0]],
            )
            .await?;

        assert_eq!(index.delete_by_document("X").await?, 2);
        let remaining = index.get_all(&[ChunkField::Metadata]).await?;
        assert!(remaining
            .iter()
            .all(|chunk| chunk.metadata.as_ref().is_some_and(|meta| meta.document_id != "X")));
        assert_eq!(index.count().await?, 1);

        assert_eq!(index.delete_by_document("X").await?, 0);
        assert_eq!(index.delete_by_document("never-existed").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_batch_is_rejected_whole() -> Result<(), SearchError> {
        let index = LocalIndex::in_memory();
        index.add(&[record("a", "first")], &[vec![1.0, 0.0]]).await?;

        let result = index
            .add(&[record("a", "again"), record("a", "more")], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await;

        assert!(result.is_err());
        assert_eq!(index.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn dimension_is_fixed_by_first_batch() -> Result<(), SearchError> {
        let index = LocalIndex::in_memory();
        index.add(&[record("a", "first")], &[vec![1.0, 0.0]]).await?;

        assert!(index.add(&[record("b", "second")], &[vec![1.0]]).await.is_err());
        assert!(index.query_similar(&[1.0, 0.0, 0.0], 1, None).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("index.json");

        let index = LocalIndex::open(&path).await?;
        index
            .add(&[record("keep", "kept text"), record("drop", "dropped")], &[vec![1.0], vec![1.0]])
            .await?;
        index.delete_by_document("drop").await?;

        let reopened = LocalIndex::open(&path).await?;
        let all = reopened.get_all(&[ChunkField::Text, ChunkField::Metadata]).await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].chunk_id, "keep_chunk_0");
        assert_eq!(all[0].text.as_deref(), Some("kept text"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_a_partial_delete() -> Result<(), SearchError> {
        let index = Arc::new(LocalIndex::in_memory());
        let records = (0..50).map(|n| record("X", &format!("chunk {n}"))).collect::<Vec<_>>();
        let embeddings = vec![vec![1.0, 0.5]; 50];
        index.add(&records, &embeddings).await?;

        let readers = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let seen = index
                            .get_all(&[ChunkField::Metadata])
                            .await?
                            .into_iter()
                            .filter(|chunk| {
                                chunk
                                    .metadata
                                    .as_ref()
                                    .is_some_and(|meta| meta.document_id == "X")
                            })
                            .count();
                        assert!(seen == 0 || seen == 50, "observed partial set of {seen}");
                        tokio::task::yield_now().await;
                    }
                    Ok::<_, SearchError>(())
                })
            })
            .collect::<Vec<_>>();

        index.delete_by_document("X").await?;

        for reader in readers {
            reader
                .await
                .map_err(|error| SearchError::Request(error.to_string()))??;
        }
        assert_eq!(index.count().await?, 0);
        Ok(())
    }
}
