//! Okapi BM25 over a whitespace-tokenized, lower-cased corpus.
//!
//! Negative idf values (terms present in more than half of the corpus) are replaced by
//! `epsilon * mean_idf`, so very common terms still contribute a little.

use std::collections::HashMap;

pub const K1: f64 = 1.5;
pub const B: f64 = 0.75;
pub const EPSILON: f64 = 0.25;

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Bm25Index {
    term_frequencies: Vec<HashMap<String, usize>>,
    lengths: Vec<usize>,
    average_length: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn new<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut term_frequencies = Vec::with_capacity(documents.len());
        let mut lengths = Vec::with_capacity(documents.len());
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for document in documents {
            let tokens = tokenize(document.as_ref());
            lengths.push(tokens.len());

            let mut frequencies: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for term in frequencies.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            term_frequencies.push(frequencies);
        }

        let corpus_size = documents.len() as f64;
        let average_length = if documents.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / corpus_size
        };

        let mut idf = HashMap::with_capacity(document_frequency.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, frequency) in document_frequency {
            let frequency = frequency as f64;
            let value = (corpus_size - frequency + 0.5).ln() - (frequency + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        if !idf.is_empty() {
            let floor = EPSILON * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            term_frequencies,
            lengths,
            average_length,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// One score per document, in corpus order. Repeated query terms count once per occurrence.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_terms = tokenize(query);
        let mut scores = vec![0.0; self.len()];
        if self.average_length == 0.0 {
            return scores;
        }

        for term in &query_terms {
            let Some(idf) = self.idf.get(term) else {
                continue;
            };
            for (index, frequencies) in self.term_frequencies.iter().enumerate() {
                let frequency = frequencies.get(term).copied().unwrap_or(0) as f64;
                if frequency == 0.0 {
                    continue;
                }
                let length_norm = 1.0 - B + B * self.lengths[index] as f64 / self.average_length;
                scores[index] += idf * (frequency * (K1 + 1.0)) / (frequency + K1 * length_norm);
            }
        }

        scores
    }

    /// Top `k` `(document index, score)` pairs by descending score, ties in corpus order,
    /// dropping non-positive scores.
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let mut ranked = self.scores(query).into_iter().enumerate().collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1));
        ranked.truncate(k);
        ranked.retain(|(_, score)| *score > 0.0);
        ranked
    }
}
