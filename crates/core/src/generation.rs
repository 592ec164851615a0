use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const AVAILABILITY_TIMEOUT_SECS: u64 = 3;
pub const GENERATION_TEMPERATURE: f32 = 0.3;
pub const GENERATION_MAX_TOKENS: u32 = 1000;

/// Answer-generation backend used by the RAG orchestrator.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Cheap reachability probe. Never fails; an unreachable backend is `false`.
    async fn is_available(&self) -> bool;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Non-streaming chat completions from an Ollama server.
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            GenerationError::Unreachable(error.to_string())
        } else if error.is_decode() {
            GenerationError::Malformed(error.to_string())
        } else {
            GenerationError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    async fn is_available(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(AVAILABILITY_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "ollama availability probe failed");
                false
            }
            Err(error) => {
                info!(%error, "ollama not reachable");
                false
            }
        }
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let start = Instant::now();

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: GENERATION_TEMPERATURE,
                num_predict: GENERATION_MAX_TOKENS,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transport(format!(
                "ollama returned {status}: {body}"
            )));
        }

        let body = response.text().await.map_err(|error| self.classify(error))?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|error| GenerationError::Malformed(error.to_string()))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            model = %self.model,
            response_len = parsed.message.content.len(),
            duration_ms = elapsed,
            "generation complete"
        );
        if elapsed > 30_000 {
            warn!(duration_ms = elapsed, prompt_len = prompt.len(), "slow generation operation");
        }

        Ok(parsed.message.content)
    }
}
