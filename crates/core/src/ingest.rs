use crate::arbiter::ExtractionArbiter;
use crate::chunking::build_chunk_records;
use crate::embeddings::Embedder;
use crate::entities::{summarize_entities, EntityRecognizer};
use crate::models::{
    accepted_extensions, ChunkField, ChunkRecord, Document, DocumentInfo, FileType, IndexStats,
    IngestionOptions, IngestionReport, Page, PageExtractionDetail,
};
use crate::traits::ChunkIndex;
use crate::IngestError;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub const PREVIEW_CHARS: usize = 500;
pub const PAGE_PREVIEW_CHARS: usize = 300;
pub const ENTITY_SUMMARY_CHARS: usize = 10_000;

/// Recursively lists every file with a supported extension, sorted.
pub fn discover_supported_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| FileType::from_path(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Resolves the stored file name and type of an upload, before anything touches the disk.
pub fn validate_upload_name(filename: &str) -> Result<(String, FileType), IngestError> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| IngestError::MissingFileName(filename.to_string()))?;

    match FileType::from_path(Path::new(name)) {
        Some(file_type) => Ok((name.to_string(), file_type)),
        None => Err(IngestError::UnsupportedFileType {
            extension: Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
                .unwrap_or_default(),
            accepted: accepted_extensions(),
        }),
    }
}

fn new_document_id() -> String {
    Uuid::new_v4().to_string().chars().take(8).collect()
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        format!("{}...", text.chars().take(limit).collect::<String>())
    } else {
        text.to_string()
    }
}

fn page_detail(page: &Page) -> PageExtractionDetail {
    let head = |text: &Option<String>| {
        text.as_deref()
            .unwrap_or_default()
            .chars()
            .take(PAGE_PREVIEW_CHARS)
            .collect::<String>()
    };

    PageExtractionDetail {
        page: page.page_number,
        primary_method: page.extraction_method,
        has_digital: page.digital_text.is_some(),
        has_ocr: page.ocr_text.is_some(),
        digital_preview: head(&page.digital_text),
        ocr_preview: head(&page.ocr_text),
        block_count: page.text_blocks.as_ref().map_or(0, Vec::len),
        preprocessing_steps: page.preprocessing_steps.clone(),
    }
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderIngestionReport {
    pub ingested: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Upload, extraction, chunking, embedding and storage of documents, plus document management.
pub struct DocumentService {
    arbiter: ExtractionArbiter,
    index: Arc<dyn ChunkIndex>,
    embedder: Arc<dyn Embedder>,
    recognizer: Arc<dyn EntityRecognizer>,
    options: IngestionOptions,
    upload_dir: PathBuf,
}

impl DocumentService {
    pub fn new(
        arbiter: ExtractionArbiter,
        index: Arc<dyn ChunkIndex>,
        embedder: Arc<dyn Embedder>,
        recognizer: Arc<dyn EntityRecognizer>,
        options: IngestionOptions,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            arbiter,
            index,
            embedder,
            recognizer,
            options,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Stores the upload under a fresh document id and runs the pipeline on it.
    ///
    /// The saved file is removed again if any later step fails.
    pub async fn ingest_upload(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<IngestionReport, IngestError> {
        let (name, file_type) = validate_upload_name(filename)?;

        let doc_id = new_document_id();
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let saved = self.upload_dir.join(format!("{doc_id}_{name}"));
        tokio::fs::write(&saved, bytes).await?;

        let document = Document {
            doc_id,
            filename: name,
            page_count: 0,
            file_type,
            upload_timestamp: Utc::now(),
            checksum: digest_bytes(bytes),
        };

        match self.process(document, &saved).await {
            Ok(report) => Ok(report),
            Err(error) => {
                if let Err(cleanup) = tokio::fs::remove_file(&saved).await {
                    warn!(path = %saved.display(), %cleanup, "failed to remove upload after error");
                }
                warn!(file = %filename, %error, "ingestion failed");
                Err(error)
            }
        }
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        validate_upload_name(filename)?;

        let bytes = tokio::fs::read(path).await?;
        self.ingest_upload(filename, &bytes).await
    }

    /// Ingests every supported file under `folder`, recording failures instead of stopping.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderIngestionReport, IngestError> {
        let files = discover_supported_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no supported files found in {}",
                folder.display()
            )));
        }

        let mut ingested = Vec::new();
        let mut skipped_files = Vec::new();
        for path in files {
            match self.ingest_file(&path).await {
                Ok(report) => ingested.push(report),
                Err(error) => skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        info!(
            folder = %folder.display(),
            ingested = ingested.len(),
            skipped = skipped_files.len(),
            "folder ingestion finished"
        );
        Ok(FolderIngestionReport {
            ingested,
            skipped_files,
        })
    }

    async fn process(
        &self,
        mut document: Document,
        saved: &Path,
    ) -> Result<IngestionReport, IngestError> {
        let pages = self.arbiter.extract(saved, document.file_type).await?;
        document.page_count = pages.len() as u32;

        let records = pages
            .iter()
            .flat_map(|page| build_chunk_records(&document, page, &self.options))
            .collect::<Vec<ChunkRecord>>();

        let stored = if records.is_empty() {
            0
        } else {
            let texts = records.iter().map(|record| record.text.clone()).collect::<Vec<_>>();
            let embeddings = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|error| IngestError::Embedding(error.to_string()))?;
            self.index.add(&records, &embeddings).await?
        };

        let full_text = pages
            .iter()
            .map(|page| page.primary_text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let summary_input = full_text.chars().take(ENTITY_SUMMARY_CHARS).collect::<String>();
        let entities = match self.recognizer.extract(&summary_input).await {
            Ok(found) => summarize_entities(&found),
            Err(error) => {
                warn!(document_id = %document.doc_id, %error, "entity summary failed");
                Vec::new()
            }
        };

        info!(
            document_id = %document.doc_id,
            filename = %document.filename,
            pages = document.page_count,
            chunks = stored,
            checksum = %document.checksum,
            "document ingested"
        );

        Ok(IngestionReport {
            message: format!(
                "[{}] Processed {} page(s) → {} chunks embedded and stored.",
                document.file_type.as_str().to_uppercase(),
                document.page_count,
                stored
            ),
            id: document.doc_id,
            filename: document.filename,
            page_count: document.page_count,
            total_chunks: stored,
            checksum: document.checksum,
            status: "processed".to_string(),
            extracted_text_preview: preview(&full_text, PREVIEW_CHARS),
            entities,
            extraction_details: pages.iter().map(page_detail).collect(),
        })
    }

    /// One entry per document id, in index order, with its chunk count.
    pub async fn list_documents(&self) -> Result<Vec<DocumentInfo>, IngestError> {
        let chunks = self.index.get_all(&[ChunkField::Metadata]).await?;

        let mut documents: Vec<DocumentInfo> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for metadata in chunks.iter().filter_map(|chunk| chunk.metadata.as_ref()) {
            match positions.get(&metadata.document_id) {
                Some(&position) => documents[position].chunk_count += 1,
                None => {
                    positions.insert(metadata.document_id.clone(), documents.len());
                    documents.push(DocumentInfo {
                        id: metadata.document_id.clone(),
                        filename: metadata.filename.clone(),
                        page_count: metadata.page_count,
                        upload_date: metadata.upload_timestamp.to_rfc3339(),
                        chunk_count: 1,
                    });
                }
            }
        }

        Ok(documents)
    }

    pub async fn stats(&self) -> Result<IndexStats, IngestError> {
        Ok(IndexStats {
            total_chunks: self.index.count().await?,
            total_documents: self.list_documents().await?.len(),
        })
    }

    /// Removes the document's chunks and its saved upload. Unknown ids remove nothing.
    pub async fn delete_document(&self, doc_id: &str) -> Result<usize, IngestError> {
        if doc_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument("document id is empty".to_string()));
        }

        let removed = self.index.delete_by_document(doc_id).await?;
        self.remove_uploads(doc_id).await;
        Ok(removed)
    }

    async fn remove_uploads(&self, doc_id: &str) {
        let prefix = format!("{doc_id}_");
        let Ok(mut entries) = tokio::fs::read_dir(&self.upload_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if matches {
                if let Err(error) = tokio::fs::remove_file(entry.path()).await {
                    warn!(path = %entry.path().display(), %error, "failed to remove upload");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::entities::PatternEntityRecognizer;
    use crate::extractor::{DigitalPage, PageExtraction, PdfExtractor};
    use crate::models::ExtractionMethod;
    use crate::stores::LocalIndex;
    use std::fs;
    use tempfile::tempdir;

    struct TextPdf(Vec<&'static str>);

    impl PdfExtractor for TextPdf {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageExtraction>, IngestError> {
            Ok(self
                .0
                .iter()
                .map(|text| {
                    Ok(DigitalPage {
                        text: text.to_string(),
                        blocks: Vec::new(),
                    })
                })
                .collect())
        }
    }

    struct BrokenPdf;

    impl PdfExtractor for BrokenPdf {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageExtraction>, IngestError> {
            Err(IngestError::PdfParse("not a pdf".to_string()))
        }
    }

    const PAGE_ONE: &str = "Acme Widgets Inc reported revenue of $4,500 for the quarter. \
        The maintenance budget grew by 12% compared with last year.";
    const PAGE_TWO: &str = "Jane Doe signed the supplier agreement on 2024-03-01. \
        Deliveries start in April and continue for two years.";

    fn service(pdf: impl PdfExtractor + 'static, upload_dir: &Path) -> Result<DocumentService, IngestError> {
        let arbiter = ExtractionArbiter::new(Arc::new(pdf), None, 0);
        Ok(DocumentService::new(
            arbiter,
            Arc::new(LocalIndex::in_memory()),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(PatternEntityRecognizer::new()?),
            IngestionOptions::default(),
            upload_dir,
        ))
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn discover_supported_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.pdf"), b"%PDF-1.4")?;
        fs::write(nested.join("scan.PNG"), b"png")?;
        fs::write(nested.join("notes.txt"), b"text")?;

        let files = discover_supported_files(dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn upload_names_are_sanitized_and_validated() -> Result<(), IngestError> {
        let (name, file_type) = validate_upload_name("../../etc/report.PDF")?;
        assert_eq!(name, "report.PDF");
        assert_eq!(file_type, FileType::Pdf);

        match validate_upload_name("notes.docx") {
            Err(IngestError::UnsupportedFileType { extension, accepted }) => {
                assert_eq!(extension, ".docx");
                assert!(accepted.contains(".webp"));
            }
            other => panic!("expected unsupported type, got {:?}", other.map(|(name, _)| name)),
        }
        assert!(validate_upload_name("").is_err());
        Ok(())
    }

    #[test]
    fn previews_append_ellipsis_only_when_truncated() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
    }

    #[tokio::test]
    async fn unsupported_upload_has_no_side_effects() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let uploads = dir.path().join("uploads");
        let service = service(TextPdf(vec![PAGE_ONE]), &uploads)?;

        let error = service.ingest_upload("notes.txt", b"hello").await.err();

        assert!(error.is_some_and(|error| error.is_client_error()));
        assert!(!uploads.exists());
        assert_eq!(service.stats().await?.total_chunks, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unopenable_file_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = service(BrokenPdf, dir.path())?;

        let error = service.ingest_upload("broken.pdf", b"%PDF-1.4 garbage").await.err();

        assert!(matches!(error, Some(IngestError::PdfParse(_))));
        assert_eq!(count_files(dir.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn upload_report_describes_the_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = service(TextPdf(vec![PAGE_ONE, PAGE_TWO]), dir.path())?;

        let report = service.ingest_upload("contract.pdf", b"%PDF-1.4").await?;

        assert_eq!(report.id.len(), 8);
        assert_eq!(report.filename, "contract.pdf");
        assert_eq!(report.page_count, 2);
        assert!(report.total_chunks > 0);
        assert_eq!(report.status, "processed");
        assert_eq!(report.checksum, digest_bytes(b"%PDF-1.4"));
        assert_eq!(
            report.message,
            format!("[PDF] Processed 2 page(s) → {} chunks embedded and stored.", report.total_chunks)
        );
        assert_eq!(report.extraction_details.len(), 2);
        assert!(report
            .extraction_details
            .iter()
            .all(|detail| detail.primary_method == ExtractionMethod::Digital && detail.has_digital));
        assert!(report.entities.iter().any(|group| group.label == "MONEY"));
        assert!(dir.path().join(format!("{}_contract.pdf", report.id)).exists());
        Ok(())
    }

    #[tokio::test]
    async fn documents_are_listed_counted_and_deleted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = service(TextPdf(vec![PAGE_ONE, PAGE_TWO]), dir.path())?;

        let first = service.ingest_upload("a.pdf", b"%PDF-1.4 a").await?;
        let second = service.ingest_upload("b.pdf", b"%PDF-1.4 b").await?;

        let listed = service.list_documents().await?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[0].chunk_count, first.total_chunks);
        assert_eq!(listed[1].page_count, 2);

        let stats = service.stats().await?;
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_chunks, first.total_chunks + second.total_chunks);

        assert_eq!(service.delete_document(&first.id).await?, first.total_chunks);
        assert_eq!(service.delete_document(&first.id).await?, 0);
        assert!(!dir.path().join(format!("{}_a.pdf", first.id)).exists());

        let remaining = service.list_documents().await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_skips_failures() -> Result<(), Box<dyn std::error::Error>> {
        let source = tempdir()?;
        let uploads = tempdir()?;
        fs::write(source.path().join("scan.png"), b"png bytes")?;
        fs::write(source.path().join("ignored.txt"), b"text")?;

        // No OCR engine: the image yields an empty page and no chunks, which is not a failure.
        let service = service(BrokenPdf, uploads.path())?;
        fs::write(source.path().join("broken.pdf"), b"%PDF-1.4")?;

        let report = service.ingest_folder(source.path()).await?;

        assert_eq!(report.ingested.len(), 1);
        assert_eq!(report.ingested[0].total_chunks, 0);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0].path.file_name().and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = service(BrokenPdf, dir.path())?;
        assert!(service.ingest_folder(dir.path()).await.is_err());
        Ok(())
    }
}
