use crate::models::ChunkRecord;
use crate::SearchError;
use std::collections::HashMap;

pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    format!("{document_id}_chunk_{ordinal}")
}

/// Ids for a batch; ordinals count per document in batch order.
pub fn assign_chunk_ids(records: &[ChunkRecord]) -> Vec<String> {
    let mut ordinals: HashMap<&str, usize> = HashMap::new();
    records
        .iter()
        .map(|record| {
            let ordinal = ordinals
                .entry(record.metadata.document_id.as_str())
                .or_insert(0);
            let id = chunk_id(&record.metadata.document_id, *ordinal);
            *ordinal += 1;
            id
        })
        .collect()
}

/// Checks a batch before any of it is written. `dimension` is the index's vector size, if
/// already fixed.
pub fn validate_batch(
    records: &[ChunkRecord],
    embeddings: &[Vec<f32>],
    dimension: Option<usize>,
) -> Result<(), SearchError> {
    if records.len() != embeddings.len() {
        return Err(SearchError::Request(format!(
            "embedding count {} doesn't match chunk count {}",
            embeddings.len(),
            records.len()
        )));
    }

    if let Some(record) = records.iter().find(|record| record.text.trim().is_empty()) {
        return Err(SearchError::Request(format!(
            "empty chunk text for document {}",
            record.metadata.document_id
        )));
    }

    let expected = dimension.or_else(|| embeddings.first().map(Vec::len));
    if let Some(expected) = expected {
        if expected == 0 {
            return Err(SearchError::Request("embedding has no dimensions".to_string()));
        }
        if let Some(embedding) = embeddings.iter().find(|embedding| embedding.len() != expected) {
            return Err(SearchError::Request(format!(
                "embedding dimension {} != {}",
                embedding.len(),
                expected
            )));
        }
    }

    Ok(())
}

/// Cosine distance `1 - cos(a, b)`; a zero vector is at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
