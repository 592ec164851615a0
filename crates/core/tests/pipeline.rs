use async_trait::async_trait;
use doc_intel_core::extractor::PageExtraction;
use doc_intel_core::{
    AnswerGenerator, CharacterNgramEmbedder, ChatOutcome, ChunkField, ChunkIndex, DigitalPage,
    DocumentService, ExtractionArbiter, ExtractionMethod, GenerationError, HybridRetriever,
    IngestError, IngestionOptions, LocalIndex, OcrEngine, OcrOutput, PatternEntityRecognizer,
    PdfExtractor, RagOrchestrator, SearchQuery, SearchType,
};
use std::path::Path;
use std::sync::Arc;

const PAGE_ONE: &str = "The hydraulic pump delivers 40 bar at full load. \
    Inspect the relief valve every 500 operating hours.";
const PAGE_TWO: &str = "Acme Widgets Inc supplies replacement seals for $120 each. \
    Orders placed before 2024-06-30 ship within five days.";

struct TwoPageDigitalPdf;

impl PdfExtractor for TwoPageDigitalPdf {
    fn extract_pages(&self, _path: &Path) -> Result<Vec<PageExtraction>, IngestError> {
        Ok([PAGE_ONE, PAGE_TWO]
            .into_iter()
            .map(|text| {
                Ok(DigitalPage {
                    text: text.to_string(),
                    blocks: Vec::new(),
                })
            })
            .collect())
    }
}

struct EchoOcr;

#[async_trait]
impl OcrEngine for EchoOcr {
    async fn recognize_image(&self, _path: &Path) -> Result<OcrOutput, IngestError> {
        Ok(OcrOutput::default())
    }

    async fn recognize_pdf_page(
        &self,
        _path: &Path,
        page_number: u32,
    ) -> Result<OcrOutput, IngestError> {
        Ok(OcrOutput {
            text: format!("ocr text of page {page_number}"),
            ..OcrOutput::default()
        })
    }
}

struct CannedGenerator;

#[async_trait]
impl AnswerGenerator for CannedGenerator {
    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, _system: &str, prompt: &str) -> Result<String, GenerationError> {
        if prompt.contains("relief valve") {
            Ok("Inspect it every 500 hours (Source 1).".to_string())
        } else {
            Err(GenerationError::Malformed("no context".to_string()))
        }
    }
}

#[tokio::test]
async fn two_page_digital_pdf_flows_through_ingest_search_and_chat(
) -> Result<(), Box<dyn std::error::Error>> {
    let uploads = tempfile::tempdir()?;
    let index = Arc::new(LocalIndex::in_memory());
    let embedder = Arc::new(CharacterNgramEmbedder::default());
    let recognizer = Arc::new(PatternEntityRecognizer::new()?);

    let options = IngestionOptions {
        demo_ocr_pages: 1,
        ..IngestionOptions::default()
    };
    let arbiter = ExtractionArbiter::new(
        Arc::new(TwoPageDigitalPdf),
        Some(Arc::new(EchoOcr)),
        options.demo_ocr_pages,
    );
    let service = DocumentService::new(
        arbiter,
        index.clone(),
        embedder.clone(),
        recognizer.clone(),
        options,
        uploads.path(),
    );

    let report = service.ingest_upload("manual.pdf", b"%PDF-1.4 fake").await?;

    assert_eq!(report.page_count, 2);
    assert!(report.total_chunks > 0);
    assert_eq!(report.extraction_details[0].primary_method, ExtractionMethod::Digital);
    assert!(report.extraction_details[0].has_ocr);
    assert_eq!(report.extraction_details[0].ocr_preview, "ocr text of page 1");
    assert!(!report.extraction_details[1].has_ocr);

    let stored = index.get_all(&[ChunkField::Metadata]).await?;
    assert_eq!(stored.len(), report.total_chunks);
    assert!(stored.iter().all(|chunk| {
        chunk.metadata.as_ref().is_some_and(|meta| {
            meta.extraction_method == ExtractionMethod::Digital
                && meta.document_id == report.id
                && meta.page_count == 2
        })
    }));

    let retriever = Arc::new(HybridRetriever::new(index.clone(), embedder, recognizer));
    let response = retriever
        .search(&SearchQuery {
            text: "relief valve inspection".to_string(),
            search_type: SearchType::Hybrid,
            top_k: 3,
            document_id: Some(report.id.clone()),
        })
        .await?;
    assert!(response.total_results > 0);
    assert_eq!(response.results[0].page_number, 1);
    assert!(response
        .results
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));

    let rag = RagOrchestrator::new(retriever, Arc::new(CannedGenerator));
    let answer = rag
        .ask("how often should the relief valve be inspected", 5, Some(report.id.as_str()))
        .await?;
    assert_eq!(answer.outcome, ChatOutcome::Answered);
    assert!(answer.answer.contains("500 hours"));

    assert_eq!(service.delete_document(&report.id).await?, report.total_chunks);
    assert_eq!(service.stats().await?.total_chunks, 0);
    assert_eq!(service.delete_document(&report.id).await?, 0);
    Ok(())
}
