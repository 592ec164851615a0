use crate::config::OcrEndpointConfig;
use crate::error::IngestError;
use crate::models::{BlockKind, FileType, TextBlock, TextLine};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::{Document, Object, ObjectId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Minimum OCR word confidence kept when building layout blocks.
const MIN_WORD_CONFIDENCE: f32 = 30.0;

/// Digital text layer of one PDF page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigitalPage {
    pub text: String,
    pub blocks: Vec<TextBlock>,
}

/// Result of extracting one page; an error only disqualifies that page's digital layer.
pub type PageExtraction = Result<DigitalPage, IngestError>;

pub trait PdfExtractor: Send + Sync {
    /// Opens the PDF and extracts every page in order. Failing to open the file is fatal.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageExtraction>, IngestError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageExtraction>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = document
            .get_pages()
            .into_iter()
            .map(|(page_no, page_id)| -> PageExtraction {
                let text = document
                    .extract_text(&[page_no])
                    .map_err(|error| IngestError::PdfParse(error.to_string()))?;
                Ok(digital_page_from_text(&text, media_box(&document, page_id)))
            })
            .collect();

        Ok(pages)
    }
}

fn media_box(document: &Document, page_id: ObjectId) -> [f32; 4] {
    let corners = document
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"MediaBox").ok())
        .and_then(|object| object.as_array().ok())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| match value {
                    Object::Integer(number) => Some(*number as f32),
                    Object::Real(number) => Some(*number as f32),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    match corners.as_slice() {
        [x0, y0, x1, y1] => [*x0, *y0, *x1, *y1],
        _ => [0.0; 4],
    }
}

/// Builds the plain text and paragraph blocks of a page from its extracted text.
///
/// lopdf exposes no glyph geometry, so every block and line carries the page box.
pub fn digital_page_from_text(raw: &str, page_box: [f32; 4]) -> DigitalPage {
    let mut plain = Vec::new();
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut open_block = false;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            open_block = false;
            continue;
        }

        plain.push(line.to_string());
        let text_line = TextLine {
            text: line.to_string(),
            bounding_box: page_box,
            font_size: 0.0,
        };

        if open_block {
            if let Some(block) = blocks.last_mut() {
                block.lines.push(text_line);
                continue;
            }
        }

        blocks.push(TextBlock {
            index: blocks.len(),
            kind: BlockKind::Text,
            bounding_box: page_box,
            lines: vec![text_line],
        });
        open_block = true;
    }

    DigitalPage {
        text: plain.join("\n"),
        blocks,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bounding_box: [f32; 4],
    pub confidence: f32,
    pub block: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub words: Vec<OcrWord>,
    /// Named base64 thumbnails of the preprocessing stages, when the engine reports them.
    pub preprocessing_steps: Option<BTreeMap<String, String>>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_image(&self, path: &Path) -> Result<OcrOutput, IngestError>;

    async fn recognize_pdf_page(
        &self,
        path: &Path,
        page_number: u32,
    ) -> Result<OcrOutput, IngestError>;
}

/// Groups recognized words by detected block into layout blocks.
pub fn layout_from_ocr_words(words: &[OcrWord]) -> Vec<TextBlock> {
    let mut grouped: BTreeMap<u32, (Vec<&str>, [f32; 4])> = BTreeMap::new();

    for word in words {
        let text = word.text.trim();
        if text.is_empty() || word.confidence < MIN_WORD_CONFIDENCE {
            continue;
        }

        let [x0, y0, x1, y1] = word.bounding_box;
        let entry = grouped
            .entry(word.block)
            .or_insert_with(|| (Vec::new(), word.bounding_box));
        entry.0.push(text);
        entry.1 = [
            entry.1[0].min(x0),
            entry.1[1].min(y0),
            entry.1[2].max(x1),
            entry.1[3].max(y1),
        ];
    }

    grouped
        .into_iter()
        .map(|(block, (words, bounding_box))| TextBlock {
            index: block as usize,
            kind: BlockKind::Text,
            bounding_box,
            lines: vec![TextLine {
                text: words.join(" "),
                bounding_box,
                font_size: 0.0,
            }],
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    file_base64: String,
    source_path: String,
    file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_number: Option<u32>,
    preprocess: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    words: Vec<OcrWord>,
    #[serde(default)]
    steps: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// OCR through a multimodal HTTP endpoint that receives the file as base64.
pub struct HttpOcrEngine {
    config: OcrEndpointConfig,
    client: Client,
}

impl HttpOcrEngine {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn request(
        &self,
        path: &Path,
        file_type: FileType,
        page_number: Option<u32>,
    ) -> Result<OcrOutput, IngestError> {
        let bytes = tokio::fs::read(path).await?;
        let payload = LlmOcrRequest {
            file_base64: STANDARD.encode(bytes),
            source_path: path.to_string_lossy().to_string(),
            file_type,
            page_number,
            preprocess: true,
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json().await?;
        Ok(payload_to_output(payload, page_number.unwrap_or(1)))
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize_image(&self, path: &Path) -> Result<OcrOutput, IngestError> {
        self.request(path, FileType::Image, None).await
    }

    async fn recognize_pdf_page(
        &self,
        path: &Path,
        page_number: u32,
    ) -> Result<OcrOutput, IngestError> {
        self.request(path, FileType::Pdf, Some(page_number)).await
    }
}

/// Picks the text for `page_number`: a matching entry of `pages`, otherwise the form-feed
/// separated `text` field. An empty recognition is a valid result, not an error.
fn payload_to_output(payload: LlmOcrResponse, page_number: u32) -> OcrOutput {
    let listed = payload.pages.as_ref().and_then(|pages| {
        pages
            .iter()
            .find(|page| page.page.unwrap_or(1) == page_number)
            .and_then(|page| page.text.as_ref())
            .map(|text| text.trim().to_string())
    });

    let text = listed.unwrap_or_else(|| {
        let raw = payload.text.as_deref().unwrap_or_default();
        if raw.contains('\u{000c}') {
            raw.split('\u{000c}')
                .nth(page_number.saturating_sub(1) as usize)
                .unwrap_or_default()
                .trim()
                .to_string()
        } else {
            raw.trim().to_string()
        }
    });

    OcrOutput {
        text,
        words: payload.words,
        preprocessing_steps: payload.steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, bounding_box: [f32; 4], confidence: f32, block: u32) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            bounding_box,
            confidence,
            block,
        }
    }

    #[test]
    fn ocr_payload_with_pages_picks_requested_page() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  Page 2 ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
            words: Vec::new(),
            steps: None,
        };

        let output = payload_to_output(response, 2);
        assert_eq!(output.text, "Page 2");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
            words: Vec::new(),
            steps: None,
        };

        assert_eq!(payload_to_output(response.clone(), 1).text, "First");
        assert_eq!(payload_to_output(response, 2).text, "Second");
    }

    #[test]
    fn ocr_payload_keeps_preprocessing_steps() {
        let mut steps = BTreeMap::new();
        steps.insert("binarized".to_string(), "aGVsbG8=".to_string());
        let response: LlmOcrResponse = serde_json::from_value(serde_json::json!({
            "text": "Invoice 42",
            "words": [
                {"text": "Invoice", "bounding_box": [0.0, 0.0, 10.0, 5.0], "confidence": 91.0, "block": 1}
            ],
            "steps": {"binarized": "aGVsbG8="}
        }))
        .expect("payload should deserialize");

        let output = payload_to_output(response, 1);
        assert_eq!(output.text, "Invoice 42");
        assert_eq!(output.words.len(), 1);
        assert_eq!(output.preprocessing_steps, Some(steps));
    }

    #[test]
    fn layout_groups_words_by_block_and_drops_low_confidence() {
        let words = vec![
            word("Total", [10.0, 10.0, 40.0, 20.0], 95.0, 2),
            word("due", [45.0, 12.0, 60.0, 22.0], 88.0, 2),
            word("smudge", [0.0, 0.0, 5.0, 5.0], 12.0, 2),
            word("Header", [5.0, 1.0, 50.0, 8.0], 90.0, 1),
            word("  ", [0.0, 0.0, 1.0, 1.0], 99.0, 3),
        ];

        let blocks = layout_from_ocr_words(&words);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].index, 1);
        assert_eq!(blocks[0].lines[0].text, "Header");
        assert_eq!(blocks[1].index, 2);
        assert_eq!(blocks[1].lines[0].text, "Total due");
        assert_eq!(blocks[1].bounding_box, [10.0, 10.0, 60.0, 22.0]);
    }

    #[test]
    fn digital_text_is_grouped_into_paragraph_blocks() {
        let page = digital_page_from_text(
            "  Title line \nsecond line\n\n\nNext paragraph\n",
            [0.0, 0.0, 612.0, 792.0],
        );

        assert_eq!(page.text, "Title line\nsecond line\nNext paragraph");
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].lines.len(), 2);
        assert_eq!(page.blocks[1].index, 1);
        assert_eq!(page.blocks[1].bounding_box, [0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn unreadable_pdf_fails_to_open() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfExtractor.extract_pages(&path);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
