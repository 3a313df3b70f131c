use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::chunking::Chunker;
use crate::embeddings::EmbeddingClient;
use crate::extractor::PdfExtractor;
use crate::models::{Chunk, ContentItem, ParsedDocument};
use crate::traits::VectorStore;
use crate::IngestError;

pub const SKIP_ALREADY_INDEXED: &str = "already_indexed";
pub const SKIP_NO_CHUNKS: &str = "no_chunks_produced";

#[derive(Debug, Clone, Serialize)]
pub struct IndexOutcome {
    pub filename: String,
    pub document_id: Option<String>,
    pub chunks_created: usize,
    pub pages: u32,
    pub processing_seconds: f64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FailedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub outcomes: Vec<IndexOutcome>,
    pub failures: Vec<FailedPdf>,
}

impl IndexReport {
    pub fn total_chunks(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| outcome.chunks_created)
            .sum()
    }

    pub fn indexed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.skipped)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.skipped)
            .count()
    }
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// Raw image bytes are extraction-time payload; only captions and identifiers
// travel into chunks and the store.
fn strip_image_bytes(document: &mut ParsedDocument) {
    for item in &mut document.items {
        if let ContentItem::Image { data, .. } = item {
            *data = None;
        }
    }
}

pub struct IndexingPipeline<X, C, E, S> {
    extractor: X,
    chunker: C,
    embedder: E,
    store: S,
}

impl<X, C, E, S> IndexingPipeline<X, C, E, S>
where
    X: PdfExtractor + Send + Sync,
    C: Chunker + Send + Sync,
    E: EmbeddingClient + Send + Sync,
    S: VectorStore + Send + Sync,
{
    pub fn new(extractor: X, chunker: C, embedder: E, store: S) -> Self {
        Self {
            extractor,
            chunker,
            embedder,
            store,
        }
    }

    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome, IngestError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?;

        let file_hash = digest_file(path)?;
        if let Some(document_id) = self.store.file_hash_exists(&file_hash).await? {
            tracing::info!(filename = %filename, document_id = %document_id, "file already indexed");
            return Ok(IndexOutcome {
                filename,
                document_id: Some(document_id),
                chunks_created: 0,
                pages: 0,
                processing_seconds: 0.0,
                skipped: true,
                skip_reason: Some(SKIP_ALREADY_INDEXED.to_string()),
                finished_at: Utc::now(),
            });
        }

        let mut document = self.extractor.extract(path)?;
        strip_image_bytes(&mut document);

        let result = self.chunker.chunk(&document).await?;
        if result.chunks.is_empty() {
            tracing::info!(filename = %filename, "no chunks produced");
            return Ok(IndexOutcome {
                filename,
                document_id: Some(document.metadata.document_id),
                chunks_created: 0,
                pages: document.metadata.total_pages,
                processing_seconds: document.metadata.processing_seconds,
                skipped: true,
                skip_reason: Some(SKIP_NO_CHUNKS.to_string()),
                finished_at: Utc::now(),
            });
        }

        let texts: Vec<String> = result.chunks.iter().map(Chunk::embedding_text).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        self.store
            .upsert(&result.chunks, &document.metadata, &embeddings)
            .await?;

        tracing::info!(
            filename = %filename,
            chunks = result.total_chunks,
            strategy = %result.strategy,
            "indexed pdf"
        );

        Ok(IndexOutcome {
            filename,
            document_id: Some(document.metadata.document_id),
            chunks_created: result.total_chunks,
            pages: document.metadata.total_pages,
            processing_seconds: document.metadata.processing_seconds,
            skipped: false,
            skip_reason: None,
            finished_at: Utc::now(),
        })
    }

    pub async fn index_folder(&self, folder: &Path) -> Result<IndexReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = IndexReport::default();
        for path in files {
            match self.index_file(&path).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping pdf");
                    report.failures.push(FailedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkerConfig, StructuralChunker};
    use crate::embeddings::HashEmbedder;
    use crate::models::DocumentMetadata;
    use crate::traits::{StoreFilter, StoreHit};
    use crate::StoreError;
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FakeExtractor {
        items: Vec<ContentItem>,
        calls: Arc<AtomicUsize>,
    }

    impl PdfExtractor for FakeExtractor {
        fn extract(&self, _path: &Path) -> Result<ParsedDocument, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ParsedDocument {
                metadata: DocumentMetadata {
                    document_id: "doc-1".to_string(),
                    filename: "pump.pdf".to_string(),
                    title: None,
                    total_pages: 2,
                    file_hash: "abc123".to_string(),
                    file_size_bytes: 64,
                    processing_seconds: 0.1,
                    ingested_at: Utc::now(),
                },
                items: self.items.clone(),
            })
        }
    }

    struct FailingExtractor;

    impl PdfExtractor for FailingExtractor {
        fn extract(&self, path: &Path) -> Result<ParsedDocument, IngestError> {
            Err(IngestError::PdfParse(format!(
                "pdf had no readable text: {}",
                path.display()
            )))
        }
    }

    struct FakeStore {
        known_document: Option<String>,
        upserts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn upsert(
            &self,
            _chunks: &[Chunk],
            _document: &DocumentMetadata,
            _embeddings: &[Vec<f32>],
        ) -> Result<(), StoreError> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query(
            &self,
            _embedding: &[f32],
            _k: usize,
            _filter: &StoreFilter,
        ) -> Result<Vec<StoreHit>, StoreError> {
            Ok(Vec::new())
        }

        async fn file_hash_exists(&self, _file_hash: &str) -> Result<Option<String>, StoreError> {
            Ok(self.known_document.clone())
        }

        async fn delete_document(&self, _document_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn text_item(text: &str) -> ContentItem {
        ContentItem::Text {
            text: text.to_string(),
            pages: vec![1],
            section_hierarchy: Vec::new(),
        }
    }

    fn pipeline(
        items: Vec<ContentItem>,
        known_document: Option<String>,
    ) -> (
        IndexingPipeline<FakeExtractor, StructuralChunker, HashEmbedder, FakeStore>,
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
    ) {
        let extractions = Arc::new(AtomicUsize::new(0));
        let upserts = Arc::new(AtomicUsize::new(0));
        let pipeline = IndexingPipeline::new(
            FakeExtractor {
                items,
                calls: Arc::clone(&extractions),
            },
            StructuralChunker::new(ChunkerConfig::default()).unwrap(),
            HashEmbedder::default(),
            FakeStore {
                known_document,
                upserts: Arc::clone(&upserts),
            },
        );
        (pipeline, extractions, upserts)
    }

    fn write_fake_pdf(path: &Path) -> std::io::Result<()> {
        File::create(path).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))
    }

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        write_fake_pdf(&base.join("b.pdf"))?;
        write_fake_pdf(&nested.join("a.PDF"))?;
        fs::write(base.join("notes.txt"), b"not a pdf")?;

        let files = discover_pdf_files(base);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0], base.join("b.pdf"));
        assert_eq!(files[1], nested.join("a.PDF"));
        Ok(())
    }

    #[test]
    fn digests_are_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        assert_eq!(digest_file(&file_path)?, digest_file(&file_path)?);
        Ok(())
    }

    #[test]
    fn image_bytes_are_dropped_before_chunking() {
        let mut document = ParsedDocument {
            metadata: DocumentMetadata {
                document_id: "doc-1".to_string(),
                filename: "pump.pdf".to_string(),
                title: None,
                total_pages: 1,
                file_hash: "abc".to_string(),
                file_size_bytes: 8,
                processing_seconds: 0.0,
                ingested_at: Utc::now(),
            },
            items: vec![ContentItem::Image {
                text: "Pump exploded view".to_string(),
                pages: vec![1],
                section_hierarchy: Vec::new(),
                image_id: Some("img-1".to_string()),
                caption: None,
                data: Some(vec![1, 2, 3]),
            }],
        };

        strip_image_bytes(&mut document);

        assert!(matches!(
            &document.items[0],
            ContentItem::Image { data: None, .. }
        ));
    }

    #[tokio::test]
    async fn matching_hash_skips_extraction_entirely() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("pump.pdf");
        write_fake_pdf(&path)?;
        let (pipeline, extractions, upserts) = pipeline(
            vec![text_item("long enough to survive the size floor, twice over")],
            Some("known-doc".to_string()),
        );

        let outcome = pipeline.index_file(&path).await?;

        assert!(outcome.skipped);
        assert_eq!(outcome.skip_reason.as_deref(), Some(SKIP_ALREADY_INDEXED));
        assert_eq!(outcome.document_id.as_deref(), Some("known-doc"));
        assert_eq!(extractions.load(Ordering::SeqCst), 0);
        assert_eq!(upserts.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn chunkless_documents_leave_the_store_untouched(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("pump.pdf");
        write_fake_pdf(&path)?;
        let (pipeline, _, upserts) = pipeline(vec![text_item("too short")], None);

        let outcome = pipeline.index_file(&path).await?;

        assert!(outcome.skipped);
        assert_eq!(outcome.skip_reason.as_deref(), Some(SKIP_NO_CHUNKS));
        assert_eq!(upserts.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn indexing_extracts_chunks_and_stores_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("pump.pdf");
        write_fake_pdf(&path)?;
        let (pipeline, extractions, upserts) = pipeline(
            vec![text_item("long enough to survive the size floor, twice over")],
            None,
        );

        let outcome = pipeline.index_file(&path).await?;

        assert!(!outcome.skipped);
        assert_eq!(outcome.chunks_created, 1);
        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.document_id.as_deref(), Some("doc-1"));
        assert_eq!(extractions.load(Ordering::SeqCst), 1);
        assert_eq!(upserts.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_folders_are_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let (pipeline, _, _) = pipeline(Vec::new(), None);

        let result = pipeline.index_folder(dir.path()).await;

        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_pdfs_fail_without_stopping_the_folder(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_fake_pdf(&dir.path().join("broken.pdf"))?;
        let upserts = Arc::new(AtomicUsize::new(0));
        let pipeline = IndexingPipeline::new(
            FailingExtractor,
            StructuralChunker::new(ChunkerConfig::default()).unwrap(),
            HashEmbedder::default(),
            FakeStore {
                known_document: None,
                upserts: Arc::clone(&upserts),
            },
        );

        let report = pipeline.index_folder(dir.path()).await?;

        assert!(report.outcomes.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.pdf")
        );
        Ok(())
    }

    #[test]
    fn report_totals_split_indexed_from_skipped() {
        let outcome = IndexOutcome {
            filename: "pump.pdf".to_string(),
            document_id: Some("doc-1".to_string()),
            chunks_created: 4,
            pages: 2,
            processing_seconds: 0.1,
            skipped: false,
            skip_reason: None,
            finished_at: Utc::now(),
        };
        let skipped = IndexOutcome {
            chunks_created: 0,
            skipped: true,
            skip_reason: Some(SKIP_ALREADY_INDEXED.to_string()),
            ..outcome.clone()
        };
        let report = IndexReport {
            outcomes: vec![outcome, skipped],
            failures: Vec::new(),
        };

        assert_eq!(report.total_chunks(), 4);
        assert_eq!(report.indexed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
    }
}
