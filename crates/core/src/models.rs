use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Table,
    Image,
    Mixed,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
            ContentType::Image => "image",
            ContentType::Mixed => "mixed",
        }
    }

    pub fn from_name(name: &str) -> Option<ContentType> {
        match name {
            "text" => Some(ContentType::Text),
            "table" => Some(ContentType::Table),
            "image" => Some(ContentType::Image),
            "mixed" => Some(ContentType::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub total_pages: u32,
    pub file_hash: String,
    pub file_size_bytes: u64,
    pub processing_seconds: f64,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
        pages: Vec<u32>,
        section_hierarchy: Vec<String>,
    },
    ListItem {
        text: String,
        pages: Vec<u32>,
        section_hierarchy: Vec<String>,
    },
    Heading {
        text: String,
        level: u8,
        pages: Vec<u32>,
        section_hierarchy: Vec<String>,
    },
    Table {
        text: String,
        pages: Vec<u32>,
        section_hierarchy: Vec<String>,
        table_id: Option<String>,
        caption: Option<String>,
    },
    Image {
        text: String,
        pages: Vec<u32>,
        section_hierarchy: Vec<String>,
        image_id: Option<String>,
        caption: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
    },
}

impl ContentItem {
    pub fn text(&self) -> &str {
        match self {
            ContentItem::Text { text, .. }
            | ContentItem::ListItem { text, .. }
            | ContentItem::Heading { text, .. }
            | ContentItem::Table { text, .. }
            | ContentItem::Image { text, .. } => text,
        }
    }

    pub fn pages(&self) -> &[u32] {
        match self {
            ContentItem::Text { pages, .. }
            | ContentItem::ListItem { pages, .. }
            | ContentItem::Heading { pages, .. }
            | ContentItem::Table { pages, .. }
            | ContentItem::Image { pages, .. } => pages,
        }
    }

    pub fn section_hierarchy(&self) -> &[String] {
        match self {
            ContentItem::Text {
                section_hierarchy, ..
            }
            | ContentItem::ListItem {
                section_hierarchy, ..
            }
            | ContentItem::Heading {
                section_hierarchy, ..
            }
            | ContentItem::Table {
                section_hierarchy, ..
            }
            | ContentItem::Image {
                section_hierarchy, ..
            } => section_hierarchy,
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, ContentItem::Table { .. } | ContentItem::Image { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub metadata: DocumentMetadata,
    pub items: Vec<ContentItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub pages: Vec<u32>,
    pub content_type: ContentType,
    pub section_hierarchy: Vec<String>,
    pub heading: Option<String>,
    pub parent_chunk_id: Option<String>,
    pub depth: u32,
    pub char_count: usize,
    pub token_count_estimate: usize,
    pub table_id: Option<String>,
    pub table_caption: Option<String>,
    pub image_id: Option<String>,
    pub image_caption: Option<String>,
}

impl ChunkMetadata {
    pub fn context_prefix(&self) -> String {
        self.section_hierarchy.join(" > ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn embedding_text(&self) -> String {
        let context = self.metadata.context_prefix();
        if context.is_empty() {
            self.content.clone()
        } else {
            format!("[{context}]\n\n{}", self.content)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub document_id: String,
    pub chunks: Vec<Chunk>,
    pub total_chunks: usize,
    pub strategy: String,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub image_chunks: usize,
    pub mixed_chunks: usize,
}

impl ChunkingResult {
    pub fn from_chunks(strategy: &str, document_id: &str, chunks: Vec<Chunk>) -> Self {
        let mut text_chunks = 0;
        let mut table_chunks = 0;
        let mut image_chunks = 0;
        let mut mixed_chunks = 0;
        for chunk in &chunks {
            match chunk.metadata.content_type {
                ContentType::Text => text_chunks += 1,
                ContentType::Table => table_chunks += 1,
                ContentType::Image => image_chunks += 1,
                ContentType::Mixed => mixed_chunks += 1,
            }
        }

        let sizes: Vec<usize> = chunks.iter().map(|c| c.metadata.char_count).collect();
        let avg_chunk_size = if sizes.is_empty() {
            0.0
        } else {
            sizes.iter().sum::<usize>() as f64 / sizes.len() as f64
        };
        let min_chunk_size = sizes.iter().copied().min().unwrap_or(0);
        let max_chunk_size = sizes.iter().copied().max().unwrap_or(0);

        Self {
            document_id: document_id.to_string(),
            total_chunks: chunks.len(),
            strategy: strategy.to_string(),
            chunks,
            avg_chunk_size,
            min_chunk_size,
            max_chunk_size,
            text_chunks,
            table_chunks,
            image_chunks,
            mixed_chunks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveOptions {
    pub n_results: usize,
    pub min_score: f32,
    pub document_id: Option<String>,
    pub document_ids: Option<Vec<String>>,
    pub content_type: Option<ContentType>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            n_results: 5,
            min_score: 0.0,
            document_id: None,
            document_ids: None,
            content_type: None,
        }
    }
}
