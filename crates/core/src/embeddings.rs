use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::EmbeddingError;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1024;
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 128;

// ~8192 tokens at roughly 4 chars per token.
const MAX_EMBED_CHARS: usize = 8192 * 4;
const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait EmbeddingClient {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl<E: EmbeddingClient + Send + Sync + ?Sized> EmbeddingClient for Arc<E> {
    fn dimensions(&self) -> usize {
        self.as_ref().dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.as_ref().embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.as_ref().embed_batch(texts).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    endpoint: Url,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: &str, model: &str, dimensions: usize) -> Result<Self, EmbeddingError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.to_string(),
            dimensions,
            client: reqwest::Client::new(),
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!("status {status}: {details}"),
            });
        }

        let payload: serde_json::Value = response.json().await?;
        let values = payload
            .pointer("/embedding")
            .and_then(|value| value.as_array())
            .ok_or_else(|| EmbeddingError::BackendResponse {
                backend: "embeddings".to_string(),
                details: "response missing embedding array".to_string(),
            })?;

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|value| value.as_f64())
            .map(|value| value as f32)
            .collect();

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::BackendResponse {
                backend: "embeddings".to_string(),
                details: format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    vector.len()
                ),
            });
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        let text = truncate_chars(text, MAX_EMBED_CHARS);

        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.request_embedding(&text).await {
                Ok(vector) => return Ok(vector),
                Err(error) => {
                    last_error = error.to_string();
                    if attempt + 1 < MAX_ATTEMPTS {
                        let wait = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            attempt = attempt + 1,
                            wait_secs = wait.as_secs(),
                            error = %last_error,
                            "embedding request failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(EmbeddingError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            details: last_error,
        })
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    tracing::warn!(chars = total, limit = max_chars, "embedding input truncated");
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: LOCAL_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashEmbedder {
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}
