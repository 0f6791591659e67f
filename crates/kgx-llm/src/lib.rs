//! kgx Completion Provider Layer
//!
//! Implementations of the `CompletionProvider` trait from `kgx-domain`.
//!
//! # Providers
//!
//! - `MockProvider`: Deterministic scripted replies for testing
//! - `ChatCompletionProvider`: OpenAI-compatible `/chat/completions` endpoints
//!
//! Which endpoint, model and credential a task talks to is decided per task
//! from a [`ModelConfig`], resolved against the provider catalogue in
//! [`provider`]. A [`ProviderFactory`] turns that configuration into a
//! provider instance when the task's job starts.
//!
//! # Examples
//!
//! ```
//! use kgx_llm::MockProvider;
//! use kgx_domain::CompletionProvider;
//!
//! let provider = MockProvider::new("Hello from the model!");
//! let reply = provider.complete("prompt", "chunk text").unwrap();
//! assert_eq!(reply, "Hello from the model!");
//! ```

#![warn(missing_docs)]

pub mod chat;
pub mod factory;
pub mod provider;

use kgx_domain::CompletionProvider;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

pub use chat::ChatCompletionProvider;
pub use factory::{ChatProviderFactory, ProviderFactory, StaticProviderFactory};
pub use provider::{ModelConfig, ProviderKind, ResolvedModel};

/// Errors that can occur during completion calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Network or transport failure, including client-side timeouts
    #[error("Communication error: {0}")]
    Communication(String),

    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body, as far as it could be read
        body: String,
    },

    /// The reply could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No credential was supplied and none was found in the environment
    #[error("Missing API key for provider '{provider}': pass one or set {env_var}")]
    MissingApiKey {
        /// Provider name
        provider: String,
        /// Environment variable consulted
        env_var: String,
    },

    /// Provider name not in the catalogue
    #[error("Unsupported provider: {0}")]
    UnknownProvider(String),

    /// Generic error
    #[error("LLM error: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Error,
}

/// Mock completion provider for deterministic testing
///
/// Replies are scripted by marker: the first registered marker contained in
/// the chunk text decides the reply, otherwise the default reply is used.
/// Clones share their script and call counter.
///
/// # Examples
///
/// ```
/// use kgx_llm::MockProvider;
/// use kgx_domain::CompletionProvider;
///
/// let provider = MockProvider::new("[]")
///     .with_reply("Alice", "alice reply")
///     .with_error("BROKEN");
///
/// assert_eq!(provider.complete("p", "Alice works here").unwrap(), "alice reply");
/// assert_eq!(provider.complete("p", "anything else").unwrap(), "[]");
/// assert!(provider.complete("p", "a BROKEN chunk").is_err());
/// assert_eq!(provider.call_count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MockProvider {
    default_reply: String,
    replies: Arc<Mutex<Vec<(String, MockReply)>>>,
    call_count: Arc<Mutex<usize>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a new MockProvider with a fixed reply for all chunks
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            default_reply: reply.into(),
            replies: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
            delay: None,
        }
    }

    /// Reply with `reply` for any chunk containing `marker`
    pub fn with_reply(self, marker: impl Into<String>, reply: impl Into<String>) -> Self {
        lock(&self.replies).push((marker.into(), MockReply::Text(reply.into())));
        self
    }

    /// Fail every call whose chunk contains `marker`
    pub fn with_error(self, marker: impl Into<String>) -> Self {
        lock(&self.replies).push((marker.into(), MockReply::Error));
        self
    }

    /// Sleep before every reply, simulating a slow endpoint
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get the number of times complete was called
    pub fn call_count(&self) -> usize {
        *lock(&self.call_count)
    }

    /// Reset the call count
    pub fn reset_call_count(&self) {
        *lock(&self.call_count) = 0;
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("Default mock response")
    }
}

impl CompletionProvider for MockProvider {
    type Error = LlmError;

    fn complete(&self, _prompt: &str, text: &str) -> Result<String, Self::Error> {
        *lock(&self.call_count) += 1;

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let scripted = lock(&self.replies)
            .iter()
            .find(|(marker, _)| text.contains(marker.as_str()))
            .map(|(_, reply)| reply.clone());

        match scripted {
            Some(MockReply::Text(reply)) => Ok(reply),
            Some(MockReply::Error) => Err(LlmError::Communication("Mock error".to_string())),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_default() {
        let provider = MockProvider::new("Test response");
        assert_eq!(provider.complete("p", "any text").unwrap(), "Test response");
    }

    #[test]
    fn test_mock_provider_scripted_replies() {
        let provider = MockProvider::default()
            .with_reply("hello", "world")
            .with_reply("foo", "bar");

        assert_eq!(provider.complete("p", "say hello").unwrap(), "world");
        assert_eq!(provider.complete("p", "foo fighters").unwrap(), "bar");
        assert_eq!(provider.complete("p", "unknown").unwrap(), "Default mock response");
    }

    #[test]
    fn test_mock_provider_first_marker_wins() {
        let provider = MockProvider::default()
            .with_reply("alpha", "first")
            .with_reply("beta", "second");

        assert_eq!(provider.complete("p", "beta alpha").unwrap(), "first");
    }

    #[test]
    fn test_mock_provider_call_count() {
        let provider = MockProvider::new("test");
        assert_eq!(provider.call_count(), 0);

        provider.complete("p", "one").unwrap();
        provider.complete("p", "two").unwrap();
        assert_eq!(provider.call_count(), 2);

        provider.reset_call_count();
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_mock_provider_error() {
        let provider = MockProvider::default().with_error("bad");
        let result = provider.complete("p", "a bad chunk");
        assert!(matches!(result, Err(LlmError::Communication(_))));
    }

    #[test]
    fn test_mock_provider_clone_shares_state() {
        let provider1 = MockProvider::new("test");
        let provider2 = provider1.clone();

        provider1.complete("p", "x").unwrap();

        assert_eq!(provider1.call_count(), 1);
        assert_eq!(provider2.call_count(), 1);
    }
}
