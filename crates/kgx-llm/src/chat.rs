//! OpenAI-compatible chat completion provider
//!
//! Sends one `POST {base_url}/chat/completions` per chunk with bearer auth,
//! a fixed system message and a user message made of the caller's prompt
//! followed by the chunk text. Sampling is deterministic by default
//! (temperature 0, top_p 1). The reply is the first choice's message content,
//! trimmed.
//!
//! # Examples
//!
//! ```no_run
//! use kgx_llm::{ChatCompletionProvider, ModelConfig, ProviderKind};
//!
//! let resolved = ModelConfig::for_provider(ProviderKind::DeepSeek)
//!     .with_api_key("sk-...")
//!     .resolve()
//!     .unwrap();
//! let provider = ChatCompletionProvider::new(resolved).unwrap();
//! ```

use crate::{LlmError, ResolvedModel};
use kgx_domain::traits::CompletionProvider;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for a single completion request (120 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default number of attempts per chunk
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// System message sent with every request
pub const SYSTEM_MESSAGE: &str =
    "You are a knowledge graph extraction assistant. Follow the user's instructions exactly.";

/// Chat completion provider for OpenAI-compatible endpoints
pub struct ChatCompletionProvider {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionProvider {
    /// Create a provider with the default request timeout
    pub fn new(resolved: ResolvedModel) -> Result<Self, LlmError> {
        Self::with_timeout(resolved, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a provider whose HTTP requests time out after `timeout`
    pub fn with_timeout(resolved: ResolvedModel, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: resolved.base_url,
            model: resolved.model,
            api_key: resolved.api_key,
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            temperature: 0.0,
            top_p: 1.0,
        })
    }

    /// Set the maximum number of attempts per chunk (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Override sampling parameters
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    /// Endpoint URL requests are sent to
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Request a completion for one chunk
    ///
    /// Transport failures, 429 and 5xx responses are retried with exponential
    /// backoff; other statuses and undecodable replies fail immediately.
    pub async fn chat(&self, prompt: &str, text: &str) -> Result<String, LlmError> {
        let url = self.endpoint();
        let user_message = format!("{}\n\nSource text:\n\n{}", prompt, text);

        let request_body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.json::<ChatResponse>().await.map_err(|e| {
                            LlmError::InvalidResponse(format!("Failed to parse response: {}", e))
                        })?;
                        return extract_content(body);
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    let error = LlmError::Http {
                        status: status.as_u16(),
                        body,
                    };
                    if !(status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS) {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
                Err(e) => {
                    last_error = Some(LlmError::Communication(format!("Request failed: {}", e)));
                }
            }

            attempts += 1;
            if attempts < self.max_retries {
                let delay = Duration::from_secs(2u64.pow(attempts - 1));
                warn!(
                    model = %self.model,
                    attempt = attempts,
                    delay_secs = delay.as_secs(),
                    "Completion request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Communication("Max retries exceeded".to_string())))
    }
}

fn extract_content(body: ChatResponse) -> Result<String, LlmError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| LlmError::InvalidResponse("Response contained no message content".to_string()))
}

impl CompletionProvider for ChatCompletionProvider {
    type Error = LlmError;

    /// Blocking wrapper around [`ChatCompletionProvider::chat`]
    ///
    /// Must be called from a blocking context (e.g. `spawn_blocking`) when a
    /// Tokio runtime is running; outside any runtime a private
    /// current-thread runtime drives the request.
    fn complete(&self, prompt: &str, text: &str) -> Result<String, Self::Error> {
        debug!(model = %self.model, chars = text.chars().count(), "Requesting completion");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.chat(prompt, text)),
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| LlmError::Other(format!("Failed to start runtime: {}", e)))?
                .block_on(self.chat(prompt, text)),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
