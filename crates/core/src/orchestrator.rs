use crate::bm25::Bm25Index;
use crate::config::DEFAULT_SEMANTIC_WEIGHT;
use crate::embeddings::Embedder;
use crate::entities::{attach_entities, EntityRecognizer};
use crate::models::{ChunkField, SearchQuery, SearchResponse, SearchResult, SearchType};
use crate::traits::ChunkIndex;
use crate::SearchError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Characters of chunk text used as the identity of a result during fusion.
pub const FUSION_KEY_CHARS: usize = 100;

/// Semantic, keyword and weighted hybrid retrieval over one chunk index.
pub struct HybridRetriever {
    index: Arc<dyn ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    recognizer: Arc<dyn EntityRecognizer>,
    semantic_weight: f64,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<dyn ChunkIndex>,
        embedder: Arc<dyn Embedder>,
        recognizer: Arc<dyn EntityRecognizer>,
    ) -> Self {
        Self {
            index,
            embedder,
            recognizer,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
        }
    }

    pub fn with_semantic_weight(mut self, weight: f64) -> Self {
        self.semantic_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn semantic_weight(&self) -> f64 {
        self.semantic_weight
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Err(SearchError::InvalidQuery(
                "result limit must be at least 1".to_string(),
            ));
        }

        let document_id = query.document_id.as_deref();
        let results = match query.search_type {
            SearchType::Semantic => {
                self.semantic_search(&query.text, query.top_k, document_id)
                    .await?
            }
            SearchType::Keyword => {
                self.keyword_search(&query.text, query.top_k, document_id)
                    .await?
            }
            SearchType::Hybrid => {
                self.hybrid_search(&query.text, query.top_k, document_id)
                    .await?
            }
        };

        Ok(SearchResponse {
            query: query.text.clone(),
            search_type: query.search_type,
            total_results: results.len(),
            results,
        })
    }

    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut results = self.semantic_hits(query, k, document_id).await?;
        attach_entities(self.recognizer.as_ref(), &mut results).await;
        Ok(results)
    }

    pub async fn keyword_search(
        &self,
        query: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let mut results = self.keyword_hits(query, k, document_id).await?;
        attach_entities(self.recognizer.as_ref(), &mut results).await;
        Ok(results)
    }

    pub async fn hybrid_search(
        &self,
        query: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let candidates = k.saturating_mul(2);
        let semantic = self.semantic_hits(query, candidates, document_id).await?;
        let keyword = self.keyword_hits(query, candidates, document_id).await?;

        debug!(
            semantic = semantic.len(),
            keyword = keyword.len(),
            weight = self.semantic_weight,
            "fusing hybrid candidates"
        );

        let mut results = fuse_results(semantic, keyword, self.semantic_weight, k);
        attach_entities(self.recognizer.as_ref(), &mut results).await;
        Ok(results)
    }

    async fn semantic_hits(
        &self,
        query: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query_vector = self.embedder.embed(query).await?;
        let hits = self.index.query_similar(&query_vector, k, document_id).await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchResult::from_parts(hit.text, &hit.metadata, round4(1.0 - hit.distance)))
            .collect())
    }

    /// BM25 over the whole corpus; the document filter applies after ranking.
    async fn keyword_hits(
        &self,
        query: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let corpus = self
            .index
            .get_all(&[ChunkField::Text, ChunkField::Metadata])
            .await?;
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let texts = corpus
            .iter()
            .map(|chunk| chunk.text.as_deref().unwrap_or_default())
            .collect::<Vec<_>>();
        let ranked = Bm25Index::new(&texts).top_k(query, corpus.len());

        let results = ranked
            .into_iter()
            .filter_map(|(position, score)| {
                let chunk = &corpus[position];
                let metadata = chunk.metadata.as_ref()?;
                if document_id.is_some_and(|id| metadata.document_id != id) {
                    return None;
                }
                Some(SearchResult::from_parts(
                    chunk.text.clone().unwrap_or_default(),
                    metadata,
                    round4(score),
                ))
            })
            .take(k)
            .collect::<Vec<_>>();

        debug!(corpus = corpus.len(), returned = results.len(), "keyword search");
        Ok(results)
    }
}

/// Weighted fusion keyed on the first characters of each chunk.
///
/// A semantic hit scores `s * weight`; a keyword hit adds `kw * (1 - weight)` to the entry with
/// the same key or becomes a new entry with that score alone. Ties keep first-seen order.
pub fn fuse_results(
    semantic: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    weight: f64,
    k: usize,
) -> Vec<SearchResult> {
    let mut fused: Vec<SearchResult> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for mut result in semantic {
        result.score *= weight;
        let key = fusion_key(&result.chunk_text);
        match positions.get(&key) {
            Some(&position) => fused[position] = result,
            None => {
                positions.insert(key, fused.len());
                fused.push(result);
            }
        }
    }

    for mut result in keyword {
        let contribution = result.score * (1.0 - weight);
        let key = fusion_key(&result.chunk_text);
        match positions.get(&key) {
            Some(&position) => fused[position].score += contribution,
            None => {
                result.score = contribution;
                positions.insert(key, fused.len());
                fused.push(result);
            }
        }
    }

    fused.sort_by(|left, right| right.score.total_cmp(&left.score));
    fused.truncate(k);
    fused
}

fn fusion_key(text: &str) -> String {
    text.chars().take(FUSION_KEY_CHARS).collect()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
