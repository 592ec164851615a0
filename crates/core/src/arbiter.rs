//! Per-page choice between the digital text layer and OCR.

use crate::error::IngestError;
use crate::extractor::{layout_from_ocr_words, DigitalPage, OcrEngine, OcrOutput, PdfExtractor};
use crate::models::{ExtractionMethod, FileType, Page};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A digital layer counts as usable only above this many characters.
pub const DIGITAL_TEXT_MIN_CHARS: usize = 50;

pub fn has_usable_digital_layer(text: &str) -> bool {
    text.chars().count() > DIGITAL_TEXT_MIN_CHARS
}

/// OCR runs on scan-only pages and on the first `demo_ocr_pages` pages for comparison.
pub fn should_run_ocr(has_digital_layer: bool, page_index: u32, demo_ocr_pages: u32) -> bool {
    !has_digital_layer || page_index < demo_ocr_pages
}

/// Builds the page record for one PDF page.
///
/// `digital` is `None` when digital extraction failed for the page; `ocr` is `None` when OCR
/// did not run or failed. A usable digital layer always wins over OCR output.
pub fn arbitrate_pdf_page(
    page_number: u32,
    digital: Option<DigitalPage>,
    ocr: Option<OcrOutput>,
) -> Page {
    let usable = digital
        .as_ref()
        .is_some_and(|page| has_usable_digital_layer(&page.text));

    match (usable, digital) {
        (true, Some(digital)) => Page {
            page_number,
            primary_text: digital.text.clone(),
            extraction_method: ExtractionMethod::Digital,
            digital_text: Some(digital.text),
            text_blocks: Some(digital.blocks),
            preprocessing_steps: ocr.as_ref().and_then(|out| out.preprocessing_steps.clone()),
            ocr_text: ocr.map(|out| out.text),
        },
        _ => Page {
            page_number,
            primary_text: ocr.as_ref().map(|out| out.text.clone()).unwrap_or_default(),
            extraction_method: ExtractionMethod::Ocr,
            digital_text: None,
            text_blocks: ocr.as_ref().map(|out| layout_from_ocr_words(&out.words)),
            preprocessing_steps: ocr.as_ref().and_then(|out| out.preprocessing_steps.clone()),
            ocr_text: ocr.map(|out| out.text),
        },
    }
}

/// Image inputs have no digital layer: exactly one OCR page.
pub fn arbitrate_image(ocr: Option<OcrOutput>) -> Page {
    Page {
        page_number: 1,
        primary_text: ocr.as_ref().map(|out| out.text.clone()).unwrap_or_default(),
        extraction_method: ExtractionMethod::Ocr,
        digital_text: None,
        text_blocks: Some(
            ocr.as_ref()
                .map(|out| layout_from_ocr_words(&out.words))
                .unwrap_or_default(),
        ),
        preprocessing_steps: ocr.as_ref().and_then(|out| out.preprocessing_steps.clone()),
        ocr_text: ocr.map(|out| out.text),
    }
}

pub struct ExtractionArbiter {
    pdf: Arc<dyn PdfExtractor>,
    ocr: Option<Arc<dyn OcrEngine>>,
    demo_ocr_pages: u32,
}

impl ExtractionArbiter {
    pub fn new(
        pdf: Arc<dyn PdfExtractor>,
        ocr: Option<Arc<dyn OcrEngine>>,
        demo_ocr_pages: u32,
    ) -> Self {
        Self {
            pdf,
            ocr,
            demo_ocr_pages,
        }
    }

    pub async fn extract(&self, path: &Path, file_type: FileType) -> Result<Vec<Page>, IngestError> {
        match file_type {
            FileType::Pdf => self.extract_pdf(path).await,
            FileType::Image => Ok(vec![self.extract_image(path).await]),
        }
    }

    pub async fn extract_pdf(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let pdf = Arc::clone(&self.pdf);
        let owned: PathBuf = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || pdf.extract_pages(&owned))
            .await
            .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;

        let mut pages = Vec::with_capacity(extracted.len());
        for (page_index, extraction) in extracted.into_iter().enumerate() {
            let page_number = page_index as u32 + 1;
            let digital = match extraction {
                Ok(page) => Some(page),
                Err(error) => {
                    warn!(page = page_number, %error, "digital extraction failed, forcing OCR");
                    None
                }
            };

            let usable = digital
                .as_ref()
                .is_some_and(|page| has_usable_digital_layer(&page.text));
            let ocr = if should_run_ocr(usable, page_index as u32, self.demo_ocr_pages) {
                self.ocr_pdf_page(path, page_number).await
            } else {
                None
            };

            let page = arbitrate_pdf_page(page_number, digital, ocr);
            debug!(
                page = page.page_number,
                method = %page.extraction_method,
                has_ocr = page.ocr_text.is_some(),
                "page arbitrated"
            );
            pages.push(page);
        }

        Ok(pages)
    }

    pub async fn extract_image(&self, path: &Path) -> Page {
        let ocr = match &self.ocr {
            Some(engine) => match engine.recognize_image(path).await {
                Ok(output) => Some(output),
                Err(error) => {
                    warn!(path = %path.display(), %error, "image OCR failed");
                    None
                }
            },
            None => None,
        };
        arbitrate_image(ocr)
    }

    async fn ocr_pdf_page(&self, path: &Path, page_number: u32) -> Option<OcrOutput> {
        let engine = self.ocr.as_ref()?;
        match engine.recognize_pdf_page(path, page_number).await {
            Ok(output) => Some(output),
            Err(error) => {
                warn!(page = page_number, %error, "page OCR failed");
                None
            }
        }
    }
}
