use crate::{Chunk, ContentType, DocumentMetadata, GenerationError, StoreError};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

#[derive(Debug, Clone, Default)]
pub struct StoreFilter {
    pub document_ids: Option<Vec<String>>,
    pub content_type: Option<ContentType>,
}

#[derive(Debug, Clone)]
pub struct StoreHit {
    pub chunk_id: String,
    pub document: String,
    pub distance: f32,
    pub document_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub heading: Option<String>,
    pub content_type: ContentType,
    pub pages: Vec<u32>,
    pub section_hierarchy: Vec<String>,
    pub chunk_index: usize,
}

#[async_trait]
pub trait VectorStore {
    async fn upsert(
        &self,
        chunks: &[Chunk],
        document: &DocumentMetadata,
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError>;

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<StoreHit>, StoreError>;

    async fn file_hash_exists(&self, file_hash: &str) -> Result<Option<String>, StoreError>;

    async fn delete_document(&self, document_id: &str) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait GenerationClient {
    fn model(&self) -> &str;

    async fn generate(&self, system: &str, user: &str) -> Result<Generated, GenerationError>;

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
    ) -> Result<TextStream, GenerationError>;
}
