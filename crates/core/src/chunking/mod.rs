mod similarity;
mod structural;

pub use similarity::SimilarityChunker;
pub use structural::StructuralChunker;

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::models::{
    Chunk, ChunkMetadata, ChunkingResult, ContentItem, ContentType, ParsedDocument,
};

// Text-only chunks shorter than this are dropped even when min_chunk_size is
// configured lower, so short-section documents are not emptied entirely.
const TEXT_FLOOR_CHARS: usize = 25;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub include_heading: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            min_chunk_size: 100,
            include_heading: true,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chunk_size {} cannot exceed chunk_size {}",
                self.min_chunk_size, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait Chunker {
    fn strategy_name(&self) -> &'static str;

    async fn chunk(&self, document: &ParsedDocument) -> Result<ChunkingResult>;
}

#[async_trait]
impl Chunker for Box<dyn Chunker + Send + Sync> {
    fn strategy_name(&self) -> &'static str {
        self.as_ref().strategy_name()
    }

    async fn chunk(&self, document: &ParsedDocument) -> Result<ChunkingResult> {
        self.as_ref().chunk(document).await
    }
}

#[derive(Debug)]
struct Section<'a> {
    heading: Option<String>,
    hierarchy: Vec<String>,
    pages: BTreeSet<u32>,
    items: Vec<&'a ContentItem>,
}

impl Section<'_> {
    fn sorted_pages(&self) -> Vec<u32> {
        self.pages.iter().copied().collect()
    }
}

fn split_sections(items: &[ContentItem]) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current = Section {
        heading: None,
        hierarchy: Vec::new(),
        pages: BTreeSet::new(),
        items: Vec::new(),
    };

    for item in items {
        if let ContentItem::Heading {
            text,
            section_hierarchy,
            ..
        } = item
        {
            if !current.items.is_empty() {
                sections.push(current);
            }
            let heading = text.trim();
            current = Section {
                heading: if heading.is_empty() {
                    None
                } else {
                    Some(heading.to_string())
                },
                hierarchy: section_hierarchy.clone(),
                pages: BTreeSet::new(),
                items: Vec::new(),
            };
        } else {
            current.pages.extend(item.pages().iter().copied());
            current.items.push(item);
        }
    }

    if !current.items.is_empty() {
        sections.push(current);
    }

    sections
}

#[derive(Debug, Default)]
struct ChunkAttachments {
    table_id: Option<String>,
    table_caption: Option<String>,
    image_id: Option<String>,
    image_caption: Option<String>,
}

fn build_chunk(
    document_id: &str,
    chunk_index: usize,
    raw_content: String,
    content_type: ContentType,
    pages: Vec<u32>,
    section: &Section<'_>,
    config: &ChunkerConfig,
    attachments: ChunkAttachments,
) -> Chunk {
    let content = match &section.heading {
        Some(heading) if config.include_heading => format!("## {heading}\n\n{raw_content}"),
        _ => raw_content,
    };
    let char_count = content.chars().count();

    Chunk {
        metadata: ChunkMetadata {
            chunk_id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index,
            pages,
            content_type,
            section_hierarchy: section.hierarchy.clone(),
            heading: section.heading.clone(),
            parent_chunk_id: None,
            depth: 0,
            char_count,
            token_count_estimate: char_count / 4,
            table_id: attachments.table_id,
            table_caption: attachments.table_caption,
            image_id: attachments.image_id,
            image_caption: attachments.image_caption,
        },
        content,
    }
}

fn resolve_pages(item_pages: &[u32], section: &Section<'_>) -> Vec<u32> {
    if item_pages.is_empty() {
        section.sorted_pages()
    } else {
        item_pages.to_vec()
    }
}

fn atomic_chunk(
    document_id: &str,
    chunk_index: usize,
    item: &ContentItem,
    section: &Section<'_>,
    config: &ChunkerConfig,
) -> Option<Chunk> {
    match item {
        ContentItem::Table {
            text,
            pages,
            table_id,
            caption,
            ..
        } => Some(build_chunk(
            document_id,
            chunk_index,
            text.trim().to_string(),
            ContentType::Table,
            resolve_pages(pages, section),
            section,
            config,
            ChunkAttachments {
                table_id: table_id.clone(),
                table_caption: caption.clone(),
                ..Default::default()
            },
        )),
        ContentItem::Image {
            text,
            pages,
            image_id,
            caption,
            ..
        } => Some(build_chunk(
            document_id,
            chunk_index,
            format!("[Image: {}]", text.trim()),
            ContentType::Image,
            resolve_pages(pages, section),
            section,
            config,
            ChunkAttachments {
                image_id: image_id.clone(),
                image_caption: caption.clone(),
                ..Default::default()
            },
        )),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct PendingBuffer {
    parts: Vec<String>,
    pages: BTreeSet<u32>,
    has_atomic: bool,
}

impl PendingBuffer {
    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn joined_len(&self) -> usize {
        if self.parts.is_empty() {
            return 0;
        }
        let text_len: usize = self.parts.iter().map(|part| part.chars().count()).sum();
        text_len + 2 * (self.parts.len() - 1)
    }

    fn would_overflow(&self, added: usize, chunk_size: usize) -> bool {
        if self.parts.is_empty() {
            return false;
        }
        self.joined_len() + 2 + added > chunk_size
    }

    fn push(&mut self, item: &ContentItem) {
        self.parts.push(item.text().trim().to_string());
        self.pages.extend(item.pages().iter().copied());
        self.has_atomic = self.has_atomic || item.is_atomic();
    }

    fn flush(
        &mut self,
        document_id: &str,
        chunk_index: usize,
        section: &Section<'_>,
        config: &ChunkerConfig,
    ) -> Option<Chunk> {
        if self.parts.is_empty() {
            return None;
        }

        let content = self.parts.join("\n\n");
        let content_type = if self.has_atomic {
            ContentType::Mixed
        } else {
            ContentType::Text
        };
        let pages = if self.pages.is_empty() {
            section.sorted_pages()
        } else {
            self.pages.iter().copied().collect()
        };

        self.parts.clear();
        self.pages.clear();
        self.has_atomic = false;

        if content_type == ContentType::Text
            && content.chars().count() < config.min_chunk_size.min(TEXT_FLOOR_CHARS)
        {
            return None;
        }

        Some(build_chunk(
            document_id,
            chunk_index,
            content,
            content_type,
            pages,
            section,
            config,
            ChunkAttachments::default(),
        ))
    }
}
