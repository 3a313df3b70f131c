use async_trait::async_trait;

use crate::chunking::{atomic_chunk, split_sections, Chunker, ChunkerConfig, PendingBuffer};
use crate::error::Result;
use crate::models::{ChunkingResult, ParsedDocument};

#[derive(Debug, Clone)]
pub struct StructuralChunker {
    config: ChunkerConfig,
}

impl StructuralChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Chunker for StructuralChunker {
    fn strategy_name(&self) -> &'static str {
        "structural"
    }

    async fn chunk(&self, document: &ParsedDocument) -> Result<ChunkingResult> {
        let document_id = document.metadata.document_id.as_str();
        let mut chunks = Vec::new();

        for section in split_sections(&document.items) {
            let mut pending = PendingBuffer::default();

            for item in &section.items {
                let text = item.text().trim();
                if text.is_empty() {
                    continue;
                }

                if item.is_atomic() {
                    if let Some(chunk) =
                        pending.flush(document_id, chunks.len(), &section, &self.config)
                    {
                        chunks.push(chunk);
                    }
                    if let Some(chunk) =
                        atomic_chunk(document_id, chunks.len(), item, &section, &self.config)
                    {
                        chunks.push(chunk);
                    }
                    continue;
                }

                if pending.would_overflow(text.chars().count(), self.config.chunk_size) {
                    if let Some(chunk) =
                        pending.flush(document_id, chunks.len(), &section, &self.config)
                    {
                        chunks.push(chunk);
                    }
                }
                pending.push(item);
            }

            if let Some(chunk) = pending.flush(document_id, chunks.len(), &section, &self.config) {
                chunks.push(chunk);
            }
        }

        Ok(ChunkingResult::from_chunks(
            self.strategy_name(),
            document_id,
            chunks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentItem, ContentType, DocumentMetadata};
    use chrono::Utc;

    fn document(items: Vec<ContentItem>) -> ParsedDocument {
        ParsedDocument {
            metadata: DocumentMetadata {
                document_id: "doc-1".to_string(),
                filename: "manual.pdf".to_string(),
                title: None,
                total_pages: 3,
                file_hash: "hash".to_string(),
                file_size_bytes: 1024,
                processing_seconds: 0.1,
                ingested_at: Utc::now(),
            },
            items,
        }
    }

    fn text_item(text: &str, pages: Vec<u32>, hierarchy: Vec<&str>) -> ContentItem {
        ContentItem::Text {
            text: text.to_string(),
            pages,
            section_hierarchy: hierarchy.into_iter().map(String::from).collect(),
        }
    }

    fn heading_item(text: &str, pages: Vec<u32>, hierarchy: Vec<&str>) -> ContentItem {
        ContentItem::Heading {
            text: text.to_string(),
            level: 1,
            pages,
            section_hierarchy: hierarchy.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn ten_char_paragraph_yields_no_chunks() {
        let chunker = StructuralChunker::new(ChunkerConfig::default()).unwrap();
        let doc = document(vec![text_item("ten chars.", vec![1], vec![])]);

        let result = chunker.chunk(&doc).await.unwrap();
        assert_eq!(result.total_chunks, 0);
        assert!(result.chunks.is_empty());
    }

    #[tokio::test]
    async fn two_headed_sections_yield_two_prefixed_chunks() {
        let chunker = StructuralChunker::new(ChunkerConfig::default()).unwrap();
        let doc = document(vec![
            heading_item("Intro", vec![1], vec!["Intro"]),
            text_item(
                "This introduction paragraph is long enough to survive the floor.",
                vec![1],
                vec!["Intro"],
            ),
            heading_item("Requirements", vec![2], vec!["Requirements"]),
            text_item(
                "The requirements paragraph is also long enough to survive the floor.",
                vec![2],
                vec!["Requirements"],
            ),
        ]);

        let result = chunker.chunk(&doc).await.unwrap();
        assert_eq!(result.total_chunks, 2);

        let first = &result.chunks[0];
        assert_eq!(first.metadata.chunk_index, 0);
        assert_eq!(first.metadata.section_hierarchy, vec!["Intro".to_string()]);
        assert!(first.content.starts_with("## Intro\n\n"));

        let second = &result.chunks[1];
        assert_eq!(second.metadata.chunk_index, 1);
        assert_eq!(
            second.metadata.section_hierarchy,
            vec!["Requirements".to_string()]
        );
        assert!(second.content.starts_with("## Requirements\n\n"));
    }

    #[tokio::test]
    async fn table_is_emitted_atomically_between_text() {
        let chunker = StructuralChunker::new(ChunkerConfig::default()).unwrap();
        let table_markdown = "| limit | value |\n| --- | --- |\n| load | 120 |";
        let doc = document(vec![
            heading_item("Limits", vec![1], vec!["Limits"]),
            text_item(
                "Paragraph before the table, long enough to be kept around.",
                vec![1],
                vec!["Limits"],
            ),
            ContentItem::Table {
                text: table_markdown.to_string(),
                pages: vec![1],
                section_hierarchy: vec!["Limits".to_string()],
                table_id: Some("t-1".to_string()),
                caption: Some("Load limits".to_string()),
            },
            text_item(
                "Paragraph after the table, also long enough to be kept around.",
                vec![2],
                vec!["Limits"],
            ),
        ]);

        let result = chunker.chunk(&doc).await.unwrap();
        assert_eq!(result.total_chunks, 3);
        assert_eq!(result.table_chunks, 1);

        let table = &result.chunks[1];
        assert_eq!(table.metadata.content_type, ContentType::Table);
        assert_eq!(table.content, format!("## Limits\n\n{table_markdown}"));
        assert_eq!(table.metadata.table_id.as_deref(), Some("t-1"));
        assert_eq!(table.metadata.table_caption.as_deref(), Some("Load limits"));
    }

    #[tokio::test]
    async fn image_without_pages_falls_back_to_section_pages() {
        let chunker = StructuralChunker::new(ChunkerConfig::default()).unwrap();
        let doc = document(vec![
            heading_item("Figures", vec![2], vec!["Figures"]),
            text_item(
                "Figure captions are described below for the reader.",
                vec![2, 3],
                vec!["Figures"],
            ),
            ContentItem::Image {
                text: "Pump assembly exploded view".to_string(),
                pages: Vec::new(),
                section_hierarchy: vec!["Figures".to_string()],
                image_id: Some("img-1".to_string()),
                caption: None,
                data: None,
            },
        ]);

        let result = chunker.chunk(&doc).await.unwrap();
        assert_eq!(result.total_chunks, 2);

        let image = &result.chunks[1];
        assert_eq!(image.metadata.content_type, ContentType::Image);
        assert_eq!(
            image.content,
            "## Figures\n\n[Image: Pump assembly exploded view]"
        );
        assert_eq!(image.metadata.pages, vec![2, 3]);
    }

    #[tokio::test]
    async fn buffer_splits_when_target_size_exceeded() {
        let config = ChunkerConfig {
            chunk_size: 80,
            chunk_overlap: 10,
            min_chunk_size: 10,
            include_heading: false,
        };
        let chunker = StructuralChunker::new(config).unwrap();
        let doc = document(vec![
            text_item(&"a".repeat(50), vec![1], vec![]),
            text_item(&"b".repeat(50), vec![1], vec![]),
            text_item(&"c".repeat(50), vec![2], vec![]),
        ]);

        let result = chunker.chunk(&doc).await.unwrap();
        assert_eq!(result.total_chunks, 3);
        assert_eq!(result.chunks[0].content, "a".repeat(50));
        assert_eq!(result.chunks[1].content, "b".repeat(50));
        assert_eq!(result.chunks[2].content, "c".repeat(50));
    }

    #[tokio::test]
    async fn rerunning_produces_identical_content_and_shape() {
        let chunker = StructuralChunker::new(ChunkerConfig::default()).unwrap();
        let doc = document(vec![
            heading_item("Intro", vec![1], vec!["Intro"]),
            text_item(
                "A deterministic paragraph that should chunk the same way twice.",
                vec![1],
                vec!["Intro"],
            ),
        ]);

        let first = chunker.chunk(&doc).await.unwrap();
        let second = chunker.chunk(&doc).await.unwrap();

        assert_eq!(first.total_chunks, second.total_chunks);
        for (a, b) in first.chunks.iter().zip(second.chunks.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.metadata.chunk_index, b.metadata.chunk_index);
            assert_eq!(a.metadata.pages, b.metadata.pages);
            assert_eq!(a.metadata.section_hierarchy, b.metadata.section_hierarchy);
        }
    }
}
