pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use chunking::{Chunker, ChunkerConfig, SimilarityChunker, StructuralChunker};
pub use embeddings::{
    EmbeddingClient, HashEmbedder, HttpEmbeddingClient, DEFAULT_EMBEDDING_DIMENSIONS,
    LOCAL_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, GenerationError, IngestError, QueryError, Result, StoreError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use generation::{HttpGenerationClient, SYSTEM_PROMPT};
pub use ingest::{discover_pdf_files, IndexOutcome, IndexReport, IndexingPipeline};
pub use models::{
    Chunk, ChunkMetadata, ChunkingResult, ContentItem, ContentType, DocumentMetadata,
    ParsedDocument, RetrieveOptions,
};
pub use orchestrator::{RagPipeline, RagResponse, RagStream, RagStreamEvent, NOT_FOUND_ANSWER};
pub use retriever::{RetrievedChunk, Retriever};
pub use stores::ChromaStore;
pub use traits::{Generated, GenerationClient, StoreFilter, StoreHit, TextStream, VectorStore};
