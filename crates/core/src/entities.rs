use crate::error::{IngestError, SearchError};
use crate::models::{Entity, EntityGroup, SearchResult};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

/// Characters of a snippet handed to the recognizer during enrichment.
pub const SNIPPET_ENTITY_CHARS: usize = 2000;
/// Entities kept per search result.
pub const MAX_ENTITIES_PER_RESULT: usize = 10;

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<Entity>, SearchError>;
}

/// Rule-based recognizer for dates, amounts, percentages, e-mails, organizations and names.
pub struct PatternEntityRecognizer {
    patterns: Vec<(&'static str, Regex)>,
}

impl PatternEntityRecognizer {
    pub fn new() -> Result<Self, IngestError> {
        let rules: [(&'static str, &str); 6] = [
            ("EMAIL", r"\b[\w.+-]+@[\w-]+(?:\.[\w-]+)+\b"),
            (
                "DATE",
                r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4})\b",
            ),
            ("MONEY", r"[$€£]\s?\d[\d,]*(?:\.\d+)?"),
            ("PERCENT", r"\b\d+(?:\.\d+)?\s?%"),
            (
                "ORG",
                r"\b(?:[A-Z][\w&-]*\s+)+(?:Inc|Corp|Corporation|Ltd|LLC|GmbH|Company|University|Institute)\b\.?",
            ),
            ("PERSON", r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b"),
        ];

        let patterns = rules
            .into_iter()
            .map(|(label, pattern)| -> Result<_, IngestError> {
                Ok((label, Regex::new(pattern)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn recognize(&self, text: &str) -> Vec<Entity> {
        let mut spans: Vec<(usize, usize, &'static str)> = Vec::new();

        for (label, pattern) in &self.patterns {
            for found in pattern.find_iter(text) {
                let overlaps = spans
                    .iter()
                    .any(|(start, end, _)| found.start() < *end && *start < found.end());
                if !overlaps {
                    spans.push((found.start(), found.end(), label));
                }
            }
        }

        spans.sort_by_key(|(start, _, _)| *start);

        let mut seen = HashSet::new();
        spans
            .into_iter()
            .filter_map(|(start, end, label)| {
                let value = text[start..end].trim().to_string();
                if !seen.insert((value.clone(), label)) {
                    return None;
                }
                Some(Entity {
                    text: value,
                    label: label.to_string(),
                    start: text[..start].chars().count(),
                    end: text[..end].chars().count(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl EntityRecognizer for PatternEntityRecognizer {
    async fn extract(&self, text: &str) -> Result<Vec<Entity>, SearchError> {
        Ok(self.recognize(text))
    }
}

/// Groups entity values by label, keeping first-seen order and unique values.
pub fn summarize_entities(entities: &[Entity]) -> Vec<EntityGroup> {
    let mut groups: Vec<EntityGroup> = Vec::new();
    for entity in entities {
        match groups.iter_mut().find(|group| group.label == entity.label) {
            Some(group) => {
                if !group.values.contains(&entity.text) {
                    group.values.push(entity.text.clone());
                }
            }
            None => groups.push(EntityGroup {
                label: entity.label.clone(),
                values: vec![entity.text.clone()],
            }),
        }
    }
    groups
}

/// Decorates each result with entities from the start of its text. Never fails the search.
pub async fn attach_entities(recognizer: &dyn EntityRecognizer, results: &mut [SearchResult]) {
    for result in results.iter_mut() {
        let snippet = result
            .chunk_text
            .chars()
            .take(SNIPPET_ENTITY_CHARS)
            .collect::<String>();
        result.entities = match recognizer.extract(&snippet).await {
            Ok(mut entities) => {
                entities.truncate(MAX_ENTITIES_PER_RESULT);
                entities
            }
            Err(error) => {
                warn!(document_id = %result.document_id, %error, "entity extraction failed");
                Vec::new()
            }
        };
    }
}
