use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::Serialize;

use crate::embeddings::EmbeddingClient;
use crate::generation::{build_context_block, build_user_message, SYSTEM_PROMPT};
use crate::models::RetrieveOptions;
use crate::retriever::{RetrievedChunk, Retriever};
use crate::traits::{GenerationClient, VectorStore};
use crate::QueryError;

pub const PRICE_INPUT_PER_MILLION: f64 = 3.0;
pub const PRICE_OUTPUT_PER_MILLION: f64 = 15.0;

pub const NOT_FOUND_ANSWER: &str =
    "I could not find any relevant information in the indexed documents.";

#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl RagResponse {
    pub fn estimated_cost_usd(&self) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * PRICE_INPUT_PER_MILLION
            + (self.output_tokens as f64 / 1_000_000.0) * PRICE_OUTPUT_PER_MILLION
    }

    pub fn format_sources(&self) -> String {
        if self.sources.is_empty() {
            return "No sources.".to_string();
        }
        self.sources
            .iter()
            .enumerate()
            .map(|(index, source)| format!("[{}] {}", index + 1, source.format_citation()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug)]
pub enum RagStreamEvent {
    Delta(String),
    Done(RagResponse),
}

pub type RagStream = BoxStream<'static, Result<RagStreamEvent, QueryError>>;

pub struct RagPipeline<S, E, G> {
    retriever: Retriever<S, E>,
    generation: G,
}

impl<S, E, G> RagPipeline<S, E, G>
where
    S: VectorStore + Send + Sync,
    E: EmbeddingClient + Send + Sync,
    G: GenerationClient + Send + Sync,
{
    pub fn new(retriever: Retriever<S, E>, generation: G) -> Self {
        Self {
            retriever,
            generation,
        }
    }

    pub async fn query(
        &self,
        question: &str,
        options: &RetrieveOptions,
    ) -> Result<RagResponse, QueryError> {
        let sources = self.retriever.retrieve(question, options).await?;
        if sources.is_empty() {
            return Ok(self.not_found_response(question, sources));
        }

        let context = build_context_block(&sources);
        let user = build_user_message(question, &context);
        let generated = self.generation.generate(SYSTEM_PROMPT, &user).await?;

        tracing::info!(
            sources = sources.len(),
            input_tokens = generated.input_tokens,
            output_tokens = generated.output_tokens,
            "answered question"
        );

        Ok(RagResponse {
            question: question.to_string(),
            answer: generated.text,
            sources,
            model: generated.model,
            input_tokens: generated.input_tokens,
            output_tokens: generated.output_tokens,
        })
    }

    pub async fn query_stream(
        &self,
        question: &str,
        options: &RetrieveOptions,
    ) -> Result<RagStream, QueryError> {
        let sources = self.retriever.retrieve(question, options).await?;
        if sources.is_empty() {
            let events: Vec<Result<RagStreamEvent, QueryError>> = vec![Ok(
                RagStreamEvent::Done(self.not_found_response(question, sources)),
            )];
            return Ok(Box::pin(stream::iter(events)));
        }

        let context = build_context_block(&sources);
        let user = build_user_message(question, &context);
        let deltas = self.generation.generate_stream(SYSTEM_PROMPT, &user).await?;

        let state = StreamState {
            deltas,
            answer: String::new(),
            pending: Some(PendingResponse {
                question: question.to_string(),
                sources,
                model: self.generation.model().to_string(),
            }),
        };

        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            match state.deltas.next().await {
                Some(Ok(delta)) => {
                    state.answer.push_str(&delta);
                    Some((Ok(RagStreamEvent::Delta(delta)), state))
                }
                Some(Err(error)) => {
                    // No Done event follows a failed stream.
                    state.pending = None;
                    Some((Err(QueryError::from(error)), state))
                }
                None => {
                    let pending = state.pending.take()?;
                    let response = RagResponse {
                        question: pending.question,
                        answer: std::mem::take(&mut state.answer),
                        sources: pending.sources,
                        model: pending.model,
                        input_tokens: 0,
                        output_tokens: 0,
                    };
                    Some((Ok(RagStreamEvent::Done(response)), state))
                }
            }
        })))
    }

    fn not_found_response(&self, question: &str, sources: Vec<RetrievedChunk>) -> RagResponse {
        RagResponse {
            question: question.to_string(),
            answer: NOT_FOUND_ANSWER.to_string(),
            sources,
            model: self.generation.model().to_string(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

struct StreamState {
    deltas: crate::traits::TextStream,
    answer: String,
    pending: Option<PendingResponse>,
}

struct PendingResponse {
    question: String,
    sources: Vec<RetrievedChunk>,
    model: String,
}
