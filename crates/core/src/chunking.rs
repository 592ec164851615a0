use crate::models::{ChunkMetadata, ChunkRecord, Document, IngestionOptions, Page};

const SENTENCE_DELIMITER: &str = ". ";
const OVERLAP_WORD_DIVISOR: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

/// Splits text into sentence-bounded chunks of roughly `chunk_size` characters.
///
/// Sentences are never split: a sentence longer than `chunk_size` becomes a chunk of its own.
/// Each new chunk is seeded with the last `overlap / 5` words of the previous one.
///
/// The size check ignores the restored `"."`, so a chunk holding two or more sentences can
/// reach `chunk_size + 1` characters. The seed words are not counted against the first
/// sentence of a chunk, so a chunk made of seed words plus one sentence has no upper bound.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let flattened = text.replace('\n', " ");
    let overlap_words = config.overlap / OVERLAP_WORD_DIVISOR;

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in flattened.split(SENTENCE_DELIMITER) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        let projected = current.chars().count() + sentence.chars().count();
        if projected > config.chunk_size && !current.is_empty() {
            chunks.push(current.trim().to_string());
            let carried = overlap_tail(&current, overlap_words);
            current = format!("{carried} {sentence}{SENTENCE_DELIMITER}");
        } else {
            current.push_str(sentence);
            current.push_str(SENTENCE_DELIMITER);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

fn overlap_tail(buffer: &str, words: usize) -> String {
    let tokens = buffer.split_whitespace().collect::<Vec<_>>();
    if words == 0 || tokens.len() <= words {
        return String::new();
    }
    tokens[tokens.len() - words..].join(" ")
}

/// Chunks one page and pairs every chunk with the page's provenance metadata.
pub fn build_chunk_records(
    document: &Document,
    page: &Page,
    options: &IngestionOptions,
) -> Vec<ChunkRecord> {
    chunk_text(&page.primary_text, ChunkingConfig::from(options))
        .into_iter()
        .map(|text| ChunkRecord {
            text,
            metadata: ChunkMetadata {
                document_id: document.doc_id.clone(),
                filename: document.filename.clone(),
                page_number: page.page_number,
                page_count: document.page_count,
                extraction_method: page.extraction_method,
                file_type: document.file_type,
                upload_timestamp: document.upload_timestamp,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMethod, FileType};

    fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
        }
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", config(500, 50)).is_empty());
        assert!(chunk_text("   \n ", config(500, 50)).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("First line\nsecond line. Another one", config(500, 50));
        assert_eq!(chunks, vec!["First line second line. Another one.".to_string()]);
    }

    #[test]
    fn sentences_close_chunks_without_overlap() {
        let chunks = chunk_text("Alpha beta. Gamma delta. Epsilon zeta", config(15, 10));
        assert_eq!(
            chunks,
            vec![
                "Alpha beta.".to_string(),
                "Gamma delta.".to_string(),
                "Epsilon zeta.".to_string(),
            ]
        );
    }

    #[test]
    fn next_chunk_is_seeded_with_tail_words() {
        let chunks = chunk_text("Alpha beta. Gamma delta. Epsilon zeta", config(15, 5));
        assert_eq!(
            chunks,
            vec![
                "Alpha beta.".to_string(),
                "beta. Gamma delta.".to_string(),
                "delta. Epsilon zeta.".to_string(),
            ]
        );
    }

    #[test]
    fn long_sentence_is_kept_whole() {
        let long_sentence = "word ".repeat(40).trim().to_string();
        let text = format!("Short one. {long_sentence}. Tail");
        let chunks = chunk_text(&text, config(30, 0));

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Short one.");
        assert_eq!(chunks[1], format!("{long_sentence}."));
        assert!(chunks[1].chars().count() > 30);
        assert_eq!(chunks[2], "Tail.");
    }

    /// Removes the words a chunk inherited from its predecessor.
    fn without_carried_words<'a>(previous: Option<&str>, chunk: &'a str, words: usize) -> &'a str {
        let Some(previous) = previous else {
            return chunk;
        };
        let tokens = previous.split_whitespace().collect::<Vec<_>>();
        if words == 0 || tokens.len() <= words {
            return chunk;
        }
        let prefix = format!("{} ", tokens[tokens.len() - words..].join(" "));
        chunk
            .strip_prefix(prefix.as_str())
            .unwrap_or_else(|| panic!("{chunk:?} should start with {prefix:?}"))
    }

    fn sample_text() -> String {
        let words = ["pump", "pressure", "relief", "valve", "inspection", "seal", "bar", "load"];
        (0..24)
            .map(|sentence| {
                (0..(sentence % 7) + 1)
                    .map(|word| words[(sentence * 3 + word) % words.len()])
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(". ")
    }

    fn sentences(text: &str) -> Vec<&str> {
        text.split(SENTENCE_DELIMITER)
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .collect()
    }

    #[test]
    fn dropping_carried_words_restores_the_sentences() {
        let text = sample_text();
        let expected = format!("{}.", sentences(&text).join(SENTENCE_DELIMITER));

        for (chunk_size, overlap) in [(15, 5), (40, 0), (40, 25), (60, 50), (120, 100)] {
            let chunks = chunk_text(&text, config(chunk_size, overlap));
            let words = overlap / OVERLAP_WORD_DIVISOR;

            let rebuilt = chunks
                .iter()
                .enumerate()
                .map(|(position, chunk)| {
                    let previous = position.checked_sub(1).map(|before| chunks[before].as_str());
                    without_carried_words(previous, chunk, words)
                })
                .collect::<Vec<_>>()
                .join(" ");

            assert_eq!(rebuilt, expected, "chunk_size={chunk_size} overlap={overlap}");
        }
    }

    #[test]
    fn multi_sentence_chunks_stay_within_one_char_of_the_limit() {
        let text = sample_text();

        for (chunk_size, overlap) in [(15, 5), (40, 0), (40, 25), (60, 50), (120, 100)] {
            let chunks = chunk_text(&text, config(chunk_size, overlap));
            let words = overlap / OVERLAP_WORD_DIVISOR;

            for (position, chunk) in chunks.iter().enumerate() {
                let previous = position.checked_sub(1).map(|before| chunks[before].as_str());
                let body = without_carried_words(previous, chunk, words);
                if body.split(SENTENCE_DELIMITER).count() > 1 {
                    assert!(
                        chunk.chars().count() <= chunk_size + 1,
                        "{chunk:?} exceeds {chunk_size} + 1"
                    );
                }
            }
        }
    }

    #[test]
    fn restored_period_may_overshoot_by_one() {
        let chunks = chunk_text("Ab. xxxxxxxxxxx", config(15, 50));
        assert_eq!(chunks, vec!["Ab. xxxxxxxxxxx.".to_string()]);
        assert_eq!(chunks[0].chars().count(), 16);
    }

    #[test]
    fn carried_words_are_not_counted_against_the_next_sentence() {
        let opening = "one two three four five six seven eight nine ten eleven";
        let long_sentence = "x".repeat(79);
        let chunks = chunk_text(&format!("{opening}. {long_sentence}"), config(80, 50));

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{opening}."));
        assert_eq!(
            chunks[1],
            format!("two three four five six seven eight nine ten eleven. {long_sentence}.")
        );
        assert!(chunks[1].chars().count() > 81);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "One two three. Four five six. Seven eight nine. Ten eleven twelve";
        assert_eq!(chunk_text(text, config(20, 10)), chunk_text(text, config(20, 10)));
    }

    #[test]
    fn records_carry_page_metadata() {
        let document = Document {
            doc_id: "a1b2c3d4".to_string(),
            filename: "manual.pdf".to_string(),
            page_count: 4,
            file_type: FileType::Pdf,
            upload_timestamp: chrono::Utc::now(),
            checksum: "checksum".to_string(),
        };
        let page = Page {
            page_number: 2,
            primary_text: "Pump pressure must stay below the limit. Check valves weekly".to_string(),
            extraction_method: ExtractionMethod::Digital,
            digital_text: None,
            ocr_text: None,
            text_blocks: None,
            preprocessing_steps: None,
        };

        let records = build_chunk_records(&document, &page, &IngestionOptions::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.document_id, "a1b2c3d4");
        assert_eq!(records[0].metadata.page_number, 2);
        assert_eq!(records[0].metadata.page_count, 4);
        assert_eq!(records[0].metadata.extraction_method, ExtractionMethod::Digital);
        assert_eq!(records[0].metadata.upload_timestamp, document.upload_timestamp);
    }
}
