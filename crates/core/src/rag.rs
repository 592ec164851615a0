//! Retrieval-augmented answering: probe the answer backend, retrieve context, generate.
//!
//! Every terminal state produces an answer string. Backend trouble is reported through
//! [`ChatOutcome`] and a canned message rather than an error, since a missing local model is an
//! ordinary operating condition. Only retrieval failures (embedding, index) surface as errors.

use crate::config::DEFAULT_GENERATION_TIMEOUT_SECS;
use crate::error::GenerationError;
use crate::generation::AnswerGenerator;
use crate::models::{ChatAnswer, ChatOutcome, SearchResult};
use crate::orchestrator::HybridRetriever;
use crate::SearchError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Sources must score strictly above this to be reported with an answer.
pub const RELEVANCE_FLOOR: f64 = 0.3;

pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

pub const SYSTEM_PROMPT: &str = "You are a helpful document assistant. Answer the user's question \
based ONLY on the provided document context.\n\
- If the answer is found in the documents, cite which source it came from (e.g., Source 1, Source 2).\n\
- If the context doesn't contain enough information, say so honestly.\n\
- Be concise and accurate.";

const BACKEND_UNAVAILABLE: &str = "The answer model is not running. Start it with `ollama serve` \
and make sure the configured model is pulled (`ollama pull <model>`). Ollama runs fully locally.";
const NO_CONTEXT: &str = "I couldn't find any relevant documents to answer your question. \
Please upload some PDFs first.";
const TIMEOUT: &str = "The answer model took too long to respond. It may still be loading; \
try again in a moment.";
const MALFORMED: &str = "Unexpected response from the answer model. Make sure the model is \
downloaded (`ollama pull <model>`).";

pub struct RagOrchestrator {
    retriever: Arc<HybridRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    timeout: Duration,
}

impl RagOrchestrator {
    pub fn new(retriever: Arc<HybridRetriever>, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            retriever,
            generator,
            timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn ask(
        &self,
        question: &str,
        k: usize,
        document_id: Option<&str>,
    ) -> Result<ChatAnswer, SearchError> {
        if question.trim().is_empty() {
            return Err(SearchError::InvalidQuery("question is empty".to_string()));
        }

        if !self.generator.is_available().await {
            return Ok(canned(ChatOutcome::BackendUnavailable, BACKEND_UNAVAILABLE, Vec::new()));
        }

        let retrieved = self
            .retriever
            .semantic_search(question, k, document_id)
            .await?;
        if retrieved.is_empty() {
            return Ok(canned(ChatOutcome::NoContext, NO_CONTEXT, Vec::new()));
        }

        let prompt = build_prompt(&build_context(&retrieved), question);
        let sources = relevant_sources(retrieved);

        let generated = match tokio::time::timeout(
            self.timeout,
            self.generator.generate(SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout.as_secs())),
        };

        let answer = match generated {
            Ok(answer) => {
                info!(sources = sources.len(), "answered question");
                ChatAnswer {
                    answer,
                    sources,
                    outcome: ChatOutcome::Answered,
                }
            }
            Err(error) => {
                warn!(%error, "answer generation failed");
                answer_for_failure(&error, sources)
            }
        };
        Ok(answer)
    }
}

fn canned(outcome: ChatOutcome, message: &str, sources: Vec<SearchResult>) -> ChatAnswer {
    ChatAnswer {
        answer: message.to_string(),
        sources,
        outcome,
    }
}

fn answer_for_failure(error: &GenerationError, sources: Vec<SearchResult>) -> ChatAnswer {
    match error {
        GenerationError::Unreachable(_) => {
            canned(ChatOutcome::BackendUnavailable, BACKEND_UNAVAILABLE, sources)
        }
        GenerationError::Timeout(_) => canned(ChatOutcome::Timeout, TIMEOUT, sources),
        GenerationError::Transport(details) => ChatAnswer {
            answer: format!("Error communicating with the answer model: {details}"),
            sources,
            outcome: ChatOutcome::TransportError,
        },
        GenerationError::Malformed(_) => {
            canned(ChatOutcome::MalformedResponse, MALFORMED, sources)
        }
    }
}

/// `[Source i: filename, Page N]` blocks, numbered from 1.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(position, result)| {
            format!(
                "[Source {}: {}, Page {}]\n{}",
                position + 1,
                result.filename,
                result.page_number,
                result.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Context from documents:\n{context}\n\nQuestion: {question}\n\nAnswer based on the documents above:"
    )
}

pub fn relevant_sources(results: Vec<SearchResult>) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(|result| result.score > RELEVANCE_FLOOR)
        .collect()
}
