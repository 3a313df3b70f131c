use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::chunking::{
    atomic_chunk, build_chunk, split_sections, ChunkAttachments, Chunker, ChunkerConfig, Section,
};
use crate::embeddings::EmbeddingClient;
use crate::error::{IngestError, Result};
use crate::models::{Chunk, ChunkingResult, ContentType, ParsedDocument};

const TERMINATOR_WINDOW_CHARS: usize = 100;
const TERMINATORS: [&str; 6] = [". ", ".\n", "? ", "?\n", "! ", "!\n"];

#[derive(Debug, Clone)]
pub struct SimilarityChunker<E> {
    config: ChunkerConfig,
    threshold: f32,
    buffer_size: usize,
    embedder: E,
}

impl<E: EmbeddingClient + Send + Sync> SimilarityChunker<E> {
    pub fn new(
        config: ChunkerConfig,
        threshold: f32,
        buffer_size: usize,
        embedder: E,
    ) -> Result<Self> {
        config.validate()?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IngestError::InvalidChunkConfig(format!(
                "similarity threshold must be within [0, 1], got {threshold}"
            )));
        }
        if buffer_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "buffer size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            config,
            threshold,
            buffer_size,
            embedder,
        })
    }

    async fn chunk_run(
        &self,
        text: &str,
        pages: Vec<u32>,
        document_id: &str,
        start_index: usize,
        section: &Section<'_>,
    ) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sentences = split_sentences(text);
        if sentences.len() <= 2 * self.buffer_size {
            return Ok(self.split_by_size(text, pages, document_id, start_index, section));
        }

        let similarities = self.boundary_similarities(&sentences).await?;
        let breakpoints = self.find_breakpoints(&similarities, &sentences);

        let mut chunks = Vec::new();
        let mut chunk_index = start_index;
        let mut prev_break = 0;

        for breakpoint in breakpoints {
            if breakpoint > prev_break {
                let content = sentences[prev_break..breakpoint].join(" ");
                chunks.push(build_chunk(
                    document_id,
                    chunk_index,
                    content,
                    ContentType::Text,
                    pages.clone(),
                    section,
                    &self.config,
                    ChunkAttachments::default(),
                ));
                chunk_index += 1;
            }
            prev_break = breakpoint;
        }

        // The trailing span is always emitted, even when short.
        if prev_break < sentences.len() {
            let content = sentences[prev_break..].join(" ");
            chunks.push(build_chunk(
                document_id,
                chunk_index,
                content,
                ContentType::Text,
                pages,
                section,
                &self.config,
                ChunkAttachments::default(),
            ));
        }

        Ok(chunks)
    }

    async fn boundary_similarities(&self, sentences: &[String]) -> Result<Vec<f32>> {
        let buffer = self.buffer_size;
        let mut groups = Vec::new();
        for i in buffer..=sentences.len() - buffer {
            groups.push(sentences[i - buffer..i].join(" "));
            groups.push(sentences[i..i + buffer].join(" "));
        }

        let embeddings = self.embedder.embed_batch(&groups).await?;

        let mut similarities = Vec::with_capacity(embeddings.len() / 2);
        for pair in embeddings.chunks_exact(2) {
            similarities.push(cosine_similarity(&pair[0], &pair[1]));
        }
        Ok(similarities)
    }

    fn find_breakpoints(&self, similarities: &[f32], sentences: &[String]) -> Vec<usize> {
        let mut breakpoints = Vec::new();
        let mut run_len: usize = sentences[..self.buffer_size]
            .iter()
            .map(|sentence| sentence.chars().count())
            .sum();

        for (offset, similarity) in similarities.iter().enumerate() {
            let boundary = self.buffer_size + offset;
            let should_break =
                *similarity < self.threshold || run_len >= self.config.chunk_size;

            if should_break && run_len >= self.config.min_chunk_size {
                breakpoints.push(boundary);
                run_len = 0;
            }
            run_len += sentences[boundary].chars().count();
        }

        breakpoints
    }

    fn split_by_size(
        &self,
        text: &str,
        pages: Vec<u32>,
        document_id: &str,
        start_index: usize,
        section: &Section<'_>,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();

        if chars.len() <= self.config.chunk_size {
            chunks.push(build_chunk(
                document_id,
                start_index,
                text.to_string(),
                ContentType::Text,
                pages,
                section,
                &self.config,
                ChunkAttachments::default(),
            ));
            return chunks;
        }

        let mut chunk_index = start_index;
        let mut start = 0;

        loop {
            let mut end = (start + self.config.chunk_size).min(chars.len());
            if end < chars.len() {
                let target = start + self.config.chunk_size;
                let search_start = target.saturating_sub(TERMINATOR_WINDOW_CHARS).max(start);
                let search_end = (target + TERMINATOR_WINDOW_CHARS).min(chars.len());
                if let Some(cut) = find_terminator(&chars[search_start..search_end]) {
                    end = search_start + cut;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(build_chunk(
                    document_id,
                    chunk_index,
                    piece.to_string(),
                    ContentType::Text,
                    pages.clone(),
                    section,
                    &self.config,
                    ChunkAttachments::default(),
                ));
                chunk_index += 1;
            }

            if end == chars.len() {
                break;
            }
            let next = end.saturating_sub(self.config.chunk_overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }
}

#[async_trait]
impl<E: EmbeddingClient + Send + Sync> Chunker for SimilarityChunker<E> {
    fn strategy_name(&self) -> &'static str {
        "similarity"
    }

    async fn chunk(&self, document: &ParsedDocument) -> Result<ChunkingResult> {
        let document_id = document.metadata.document_id.as_str();
        let mut chunks = Vec::new();

        for section in split_sections(&document.items) {
            let mut run = RunBuffer::default();

            for item in &section.items {
                let text = item.text().trim();
                if text.is_empty() {
                    continue;
                }

                if item.is_atomic() {
                    if !run.is_empty() {
                        let (run_text, run_pages) = run.take();
                        let produced = self
                            .chunk_run(&run_text, run_pages, document_id, chunks.len(), &section)
                            .await?;
                        chunks.extend(produced);
                    }
                    if let Some(chunk) =
                        atomic_chunk(document_id, chunks.len(), item, &section, &self.config)
                    {
                        chunks.push(chunk);
                    }
                    continue;
                }

                run.push(text, item.pages());
            }

            if !run.is_empty() {
                let (run_text, run_pages) = run.take();
                let produced = self
                    .chunk_run(&run_text, run_pages, document_id, chunks.len(), &section)
                    .await?;
                chunks.extend(produced);
            }
        }

        Ok(ChunkingResult::from_chunks(
            self.strategy_name(),
            document_id,
            chunks,
        ))
    }
}

#[derive(Debug, Default)]
struct RunBuffer {
    parts: Vec<String>,
    pages: BTreeSet<u32>,
}

impl RunBuffer {
    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn push(&mut self, text: &str, pages: &[u32]) {
        self.parts.push(text.to_string());
        self.pages.extend(pages.iter().copied());
    }

    fn take(&mut self) -> (String, Vec<u32>) {
        let text = self.parts.join("\n\n");
        let pages = self.pages.iter().copied().collect();
        self.parts.clear();
        self.pages.clear();
        (text, pages)
    }
}

// Boundaries: sentence-final punctuation followed by whitespace and an ASCII
// capital, or a newline followed by a non-whitespace character.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if matches!(c, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() && chars[j].is_ascii_uppercase() {
                pieces.push(chars[start..=i].iter().collect::<String>());
                start = j;
                i = j;
                continue;
            }
        }

        if c == '\n' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() {
                pieces.push(chars[start..=i].iter().collect::<String>());
                start = j;
                i = j;
                continue;
            }
        }

        i += 1;
    }

    if start < chars.len() {
        pieces.push(chars[start..].iter().collect::<String>());
    }

    pieces
        .iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn find_terminator(window: &[char]) -> Option<usize> {
    let text: String = window.iter().collect();
    for pattern in TERMINATORS {
        if let Some(byte_idx) = text.find(pattern) {
            let char_idx = text[..byte_idx].chars().count();
            return Some(char_idx + pattern.chars().count());
        }
    }
    None
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
