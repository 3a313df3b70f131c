use serde::Serialize;

use crate::embeddings::EmbeddingClient;
use crate::models::{ContentType, RetrieveOptions};
use crate::traits::{StoreFilter, VectorStore};
use crate::QueryError;

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub filename: String,
    pub title: Option<String>,
    pub heading: Option<String>,
    pub pages: Vec<u32>,
    pub section_hierarchy: Vec<String>,
    pub content_type: ContentType,
    pub chunk_index: usize,
}

impl RetrievedChunk {
    pub fn section_label(&self) -> String {
        if !self.section_hierarchy.is_empty() {
            self.section_hierarchy.join(" > ")
        } else if let Some(heading) = &self.heading {
            heading.clone()
        } else {
            "—".to_string()
        }
    }

    pub fn format_citation(&self) -> String {
        let pages = if self.pages.is_empty() {
            "?".to_string()
        } else {
            self.pages
                .iter()
                .map(|page| format!("p.{page}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match &self.heading {
            Some(heading) => format!("{} — {} ({})", self.filename, heading, pages),
            None => format!("{} ({})", self.filename, pages),
        }
    }
}

pub struct Retriever<S, E> {
    store: S,
    embedder: E,
}

impl<S: VectorStore, E: EmbeddingClient> Retriever<S, E> {
    pub fn new(store: S, embedder: E) -> Self {
        Self { store, embedder }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        let embedding = self.embedder.embed(query).await?;

        // An explicit id list overrides the single-document shorthand. An
        // empty list means the caller scoped the search to nothing.
        let scope = options
            .document_ids
            .clone()
            .or_else(|| options.document_id.clone().map(|id| vec![id]));
        if let Some(ids) = &scope {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let filter = StoreFilter {
            document_ids: scope,
            content_type: options.content_type,
        };
        let hits = self
            .store
            .query(&embedding, options.n_results, &filter)
            .await?;

        let mut retrieved = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = 1.0 - hit.distance;
            if score < options.min_score {
                continue;
            }
            retrieved.push(RetrievedChunk {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                content: hit.document,
                score,
                filename: hit.filename,
                title: hit.title,
                heading: hit.heading,
                pages: hit.pages,
                section_hierarchy: hit.section_hierarchy,
                content_type: hit.content_type,
                chunk_index: hit.chunk_index,
            });
        }

        tracing::debug!(kept = retrieved.len(), "retrieved context chunks");
        Ok(retrieved)
    }
}
