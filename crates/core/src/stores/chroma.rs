use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::models::{Chunk, ContentType, DocumentMetadata};
use crate::traits::{StoreFilter, StoreHit, VectorStore};
use crate::StoreError;

pub struct ChromaStore {
    endpoint: String,
    collection: String,
    client: Client,
    collection_id: OnceCell<String>,
}

impl ChromaStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            collection_id: OnceCell::new(),
        }
    }

    // The collection is created on first use and its id cached for the
    // lifetime of the store.
    async fn collection_id(&self) -> Result<&str, StoreError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .post(format!("{}/api/v1/collections", self.endpoint))
                    .json(&json!({
                        "name": self.collection,
                        "get_or_create": true,
                        "metadata": { "hnsw:space": "cosine" },
                    }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(StoreError::BackendResponse {
                        backend: "chroma".to_string(),
                        details: response.status().to_string(),
                    });
                }

                let parsed: Value = response.json().await?;
                parsed
                    .pointer("/id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::BackendResponse {
                        backend: "chroma".to_string(),
                        details: "collection response carried no id".to_string(),
                    })
            })
            .await?;

        Ok(id)
    }

    fn collection_url(&self, collection_id: &str, operation: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.endpoint, collection_id, operation
        )
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    async fn upsert(
        &self,
        chunks: &[Chunk],
        document: &DocumentMetadata,
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let ids: Vec<&str> = chunks
            .iter()
            .map(|chunk| chunk.metadata.chunk_id.as_str())
            .collect();
        let documents: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
        let metadatas = chunks
            .iter()
            .map(|chunk| flat_metadata(chunk, document))
            .collect::<Result<Vec<_>, _>>()?;

        let collection_id = self.collection_id().await?;
        let response = self
            .client
            .post(self.collection_url(collection_id, "upsert"))
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        tracing::info!(
            chunks = chunks.len(),
            filename = %document.filename,
            "stored chunk embeddings"
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        if let Some(ids) = &filter.document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let total = self.count().await?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k.min(total) as u64,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(condition) = build_where(filter) {
            body["where"] = condition;
        }

        let collection_id = self.collection_id().await?;
        let response = self
            .client
            .post(self.collection_url(collection_id, "query"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        // Results come back as parallel arrays nested per query embedding.
        let parsed: Value = response.json().await?;
        let ids = parsed
            .pointer("/ids/0")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::with_capacity(ids.len());
        for (position, chunk_id) in ids.iter().enumerate() {
            let chunk_id = chunk_id.as_str().unwrap_or_default().to_string();
            let document = parsed
                .pointer(&format!("/documents/0/{position}"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let distance = parsed
                .pointer(&format!("/distances/0/{position}"))
                .and_then(Value::as_f64)
                .unwrap_or_default() as f32;
            let metadata = parsed
                .pointer(&format!("/metadatas/0/{position}"))
                .cloned()
                .unwrap_or(Value::Null);
            hits.push(decode_hit(chunk_id, document, distance, &metadata));
        }
        Ok(hits)
    }

    async fn file_hash_exists(&self, file_hash: &str) -> Result<Option<String>, StoreError> {
        let collection_id = self.collection_id().await?;
        let response = self
            .client
            .post(self.collection_url(collection_id, "get"))
            .json(&json!({
                "where": { "file_hash": { "$eq": file_hash } },
                "limit": 1,
                "include": ["metadatas"],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/metadatas/0/document_id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, StoreError> {
        let collection_id = self.collection_id().await?;
        let response = self
            .client
            .post(self.collection_url(collection_id, "get"))
            .json(&json!({
                "where": { "document_id": { "$eq": document_id } },
                "include": [],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let ids = parsed
            .pointer("/ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if ids.is_empty() {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.collection_url(collection_id, "delete"))
            .json(&json!({ "ids": ids }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        tracing::info!(chunks = ids.len(), document_id, "deleted document chunks");
        Ok(ids.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let collection_id = self.collection_id().await?;
        let response = self
            .client
            .get(self.collection_url(collection_id, "count"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "chroma".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed.as_u64().unwrap_or_default() as usize)
    }
}

// Chroma metadata values must be scalars, so list fields travel as JSON
// strings and are decoded again on the way out.
fn flat_metadata(chunk: &Chunk, document: &DocumentMetadata) -> Result<Value, StoreError> {
    let metadata = &chunk.metadata;
    Ok(json!({
        "document_id": metadata.document_id,
        "filename": document.filename,
        "title": document.title.clone().unwrap_or_default(),
        "file_hash": document.file_hash,
        "chunk_id": metadata.chunk_id,
        "chunk_index": metadata.chunk_index as u64,
        "content_type": metadata.content_type.as_str(),
        "heading": metadata.heading.clone().unwrap_or_default(),
        "page_numbers": serde_json::to_string(&metadata.pages)?,
        "section_hierarchy": serde_json::to_string(&metadata.section_hierarchy)?,
        "char_count": metadata.char_count as u64,
        "token_count_estimate": metadata.token_count_estimate as u64,
    }))
}

fn build_where(filter: &StoreFilter) -> Option<Value> {
    let mut conditions = Vec::new();
    if let Some(ids) = &filter.document_ids {
        if ids.len() == 1 {
            conditions.push(json!({ "document_id": { "$eq": ids[0] } }));
        } else {
            conditions.push(json!({ "document_id": { "$in": ids } }));
        }
    }
    if let Some(content_type) = filter.content_type {
        conditions.push(json!({ "content_type": { "$eq": content_type.as_str() } }));
    }

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(json!({ "$and": conditions })),
    }
}

fn decode_hit(chunk_id: String, document: String, distance: f32, metadata: &Value) -> StoreHit {
    let string_field = |key: &str| {
        metadata
            .pointer(&format!("/{key}"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let optional_field = |key: &str| {
        metadata
            .pointer(&format!("/{key}"))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    StoreHit {
        chunk_id,
        document,
        distance,
        document_id: string_field("document_id"),
        filename: string_field("filename"),
        title: optional_field("title"),
        heading: optional_field("heading"),
        content_type: metadata
            .pointer("/content_type")
            .and_then(Value::as_str)
            .and_then(ContentType::from_name)
            .unwrap_or(ContentType::Text),
        pages: decoded_list(metadata, "page_numbers"),
        section_hierarchy: decoded_list(metadata, "section_hierarchy"),
        chunk_index: metadata
            .pointer("/chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
    }
}

fn decoded_list<T: serde::de::DeserializeOwned>(metadata: &Value, key: &str) -> Vec<T> {
    metadata
        .pointer(&format!("/{key}"))
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk() -> Chunk {
        Chunk {
            content: "Rated flow is 120 l/min.".to_string(),
            metadata: ChunkMetadata {
                chunk_id: "chunk-1".to_string(),
                document_id: "doc-1".to_string(),
                chunk_index: 3,
                pages: vec![4, 5],
                content_type: ContentType::Text,
                section_hierarchy: vec!["Specifications".to_string(), "Hydraulics".to_string()],
                heading: Some("Hydraulics".to_string()),
                parent_chunk_id: None,
                depth: 0,
                char_count: 24,
                token_count_estimate: 6,
                table_id: None,
                table_caption: None,
                image_id: None,
                image_caption: None,
            },
        }
    }

    fn document() -> DocumentMetadata {
        DocumentMetadata {
            document_id: "doc-1".to_string(),
            filename: "pump.pdf".to_string(),
            title: Some("Pump Manual".to_string()),
            total_pages: 12,
            file_hash: "abc123".to_string(),
            file_size_bytes: 2048,
            processing_seconds: 0.2,
            ingested_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn metadata_flattens_lists_to_json_strings() {
        let value = flat_metadata(&chunk(), &document()).unwrap();

        assert_eq!(value["page_numbers"], "[4,5]");
        assert_eq!(
            value["section_hierarchy"],
            "[\"Specifications\",\"Hydraulics\"]"
        );
        assert_eq!(value["content_type"], "text");
        assert_eq!(value["title"], "Pump Manual");
        assert_eq!(value["chunk_index"], 3);
    }

    #[test]
    fn no_filter_builds_no_where_clause() {
        assert_eq!(build_where(&StoreFilter::default()), None);
    }

    #[test]
    fn single_document_filters_with_eq() {
        let filter = StoreFilter {
            document_ids: Some(vec!["doc-1".to_string()]),
            content_type: None,
        };

        assert_eq!(
            build_where(&filter),
            Some(json!({ "document_id": { "$eq": "doc-1" } }))
        );
    }

    #[test]
    fn several_documents_filter_with_in() {
        let filter = StoreFilter {
            document_ids: Some(vec!["doc-1".to_string(), "doc-2".to_string()]),
            content_type: None,
        };

        assert_eq!(
            build_where(&filter),
            Some(json!({ "document_id": { "$in": ["doc-1", "doc-2"] } }))
        );
    }

    #[test]
    fn combined_filters_join_under_and() {
        let filter = StoreFilter {
            document_ids: Some(vec!["doc-1".to_string()]),
            content_type: Some(ContentType::Table),
        };

        assert_eq!(
            build_where(&filter),
            Some(json!({ "$and": [
                { "document_id": { "$eq": "doc-1" } },
                { "content_type": { "$eq": "table" } },
            ] }))
        );
    }

    #[test]
    fn hit_decoding_restores_lists_and_empty_optionals() {
        let metadata = json!({
            "document_id": "doc-1",
            "filename": "pump.pdf",
            "title": "",
            "heading": "Hydraulics",
            "content_type": "table",
            "page_numbers": "[4,5]",
            "section_hierarchy": "[\"Specifications\"]",
            "chunk_index": 3,
        });

        let hit = decode_hit(
            "chunk-1".to_string(),
            "[Specifications]\n\ncontent".to_string(),
            0.25,
            &metadata,
        );

        assert_eq!(hit.document_id, "doc-1");
        assert_eq!(hit.title, None);
        assert_eq!(hit.heading.as_deref(), Some("Hydraulics"));
        assert_eq!(hit.content_type, ContentType::Table);
        assert_eq!(hit.pages, vec![4, 5]);
        assert_eq!(hit.section_hierarchy, vec!["Specifications".to_string()]);
        assert_eq!(hit.chunk_index, 3);
    }

    #[test]
    fn malformed_metadata_falls_back_to_defaults() {
        let hit = decode_hit(
            "chunk-1".to_string(),
            "content".to_string(),
            0.0,
            &Value::Null,
        );

        assert_eq!(hit.content_type, ContentType::Text);
        assert!(hit.pages.is_empty());
        assert_eq!(hit.title, None);
        assert_eq!(hit.chunk_index, 0);
    }
}
