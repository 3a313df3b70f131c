use async_trait::async_trait;
use futures_util::{stream, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::retriever::RetrievedChunk;
use crate::traits::{Generated, GenerationClient, TextStream};
use crate::GenerationError;

pub const SYSTEM_PROMPT: &str = "You are a precise assistant that answers questions based on provided document excerpts.

Answer the user's question using ONLY the information in the numbered context passages provided.
Follow these rules strictly:
- Cite sources inline using [1], [2], etc. matching the passage numbers
- Preserve all numbers, measurements, and data exactly as written
- If the context does not contain enough information to answer fully, say so clearly and state what is missing
- If passages contain conflicting information, note the discrepancy explicitly
- Do not add information from your own knowledge beyond what the context provides
";

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f32 = 0.0;

pub fn build_context_block(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return "No context passages available.".to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            format!(
                "[{}] File: {} | Section: {} | Pages: {}\n{}",
                index + 1,
                chunk.filename,
                chunk.section_label(),
                pages_label(&chunk.pages),
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_message(question: &str, context: &str) -> String {
    format!("Context passages:\n\n{context}\n\n---\n\nQuestion: {question}")
}

fn pages_label(pages: &[u32]) -> String {
    if pages.is_empty() {
        "?".to_string()
    } else {
        pages
            .iter()
            .map(|page| format!("p.{page}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct HttpGenerationClient {
    endpoint: Url,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: Client,
}

impl HttpGenerationClient {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            model: model.to_string(),
            api_key,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            client: Client::new(),
        })
    }

    fn request_body(&self, system: &str, user: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request
                .header("x-api-key", key)
                .header("anthropic-version", "2023-06-01");
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let details = response.text().await.unwrap_or_default();
        Err(classify_status(status, &self.model, details))
    }
}

fn classify_status(status: StatusCode, model: &str, details: String) -> GenerationError {
    match status.as_u16() {
        401 | 403 => GenerationError::AccessDenied(format!(
            "the API key was rejected (status {status}); check the key and its access to model '{model}'"
        )),
        404 => GenerationError::ModelNotAvailable {
            model: model.to_string(),
            details,
        },
        429 => GenerationError::RateLimited(details),
        400 if details.contains("model") => GenerationError::ModelNotAvailable {
            model: model.to_string(),
            details,
        },
        400 => GenerationError::InvalidRequest(details),
        _ => GenerationError::BackendResponse {
            backend: "generation".to_string(),
            details: format!("status {status}: {details}"),
        },
    }
}

// One SSE line. Only text deltas carry answer content; other event types
// (message_start, ping, content_block_stop) are dropped.
fn parse_sse_line(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let event: Value = serde_json::from_str(payload).ok()?;
    if event.pointer("/type").and_then(Value::as_str) != Some("content_block_delta")
        || event.pointer("/delta/type").and_then(Value::as_str) != Some("text_delta")
    {
        return None;
    }

    event
        .pointer("/delta/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, user: &str) -> Result<Generated, GenerationError> {
        let response = self.send(&self.request_body(system, user, false)).await?;
        let parsed: Value = response.json().await?;

        let text = parsed
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerationError::BackendResponse {
                backend: "generation".to_string(),
                details: "response carried no text content".to_string(),
            })?
            .to_string();
        let model = parsed
            .pointer("/model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();
        let input_tokens = parsed
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let output_tokens = parsed
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        Ok(Generated {
            text,
            model,
            input_tokens,
            output_tokens,
        })
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
    ) -> Result<TextStream, GenerationError> {
        let response = self.send(&self.request_body(system, user, true)).await?;

        // Byte chunks arrive at arbitrary boundaries, so partial lines are
        // carried over. Splitting on b'\n' is safe in UTF-8.
        let mut carry: Vec<u8> = Vec::new();
        let deltas = response
            .bytes_stream()
            .map_err(|error| GenerationError::Stream(error.to_string()))
            .map_ok(move |chunk| {
                carry.extend_from_slice(&chunk);
                let mut parsed: Vec<Result<String, GenerationError>> = Vec::new();
                while let Some(newline) = carry.iter().position(|byte| *byte == b'\n') {
                    let line: Vec<u8> = carry.drain(..=newline).collect();
                    if let Some(delta) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                        parsed.push(Ok(delta));
                    }
                }
                stream::iter(parsed)
            })
            .try_flatten();

        Ok(Box::pin(deltas))
    }
}
