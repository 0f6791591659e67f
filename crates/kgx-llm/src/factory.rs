//! Building providers from per-task model configuration

use crate::{ChatCompletionProvider, LlmError, ModelConfig};
use kgx_domain::traits::CompletionProvider;
use std::time::Duration;

/// Builds a completion provider for a task
///
/// The task layer holds one factory and calls it once per task job, with the
/// task's own [`ModelConfig`].
pub trait ProviderFactory: Send + Sync + 'static {
    /// Provider produced by this factory
    type Provider: CompletionProvider<Error = LlmError> + Send + Sync + 'static;

    /// Build a provider for `model`
    fn build(&self, model: &ModelConfig) -> Result<Self::Provider, LlmError>;

    /// Check that `model` names a known provider, without building anything
    fn validate(&self, model: &ModelConfig) -> Result<(), LlmError> {
        model.kind().map(|_| ())
    }
}

/// Factory producing [`ChatCompletionProvider`]s
#[derive(Debug, Clone)]
pub struct ChatProviderFactory {
    timeout: Duration,
    max_retries: u32,
    temperature: f32,
    top_p: f32,
}

impl ChatProviderFactory {
    /// Create a factory with the given request timeout and attempts per chunk
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            temperature: 0.0,
            top_p: 1.0,
        }
    }

    /// Sampling parameters applied to every built provider
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }
}

impl Default for ChatProviderFactory {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(crate::chat::DEFAULT_TIMEOUT_SECS),
            crate::chat::DEFAULT_MAX_RETRIES,
        )
    }
}

impl ProviderFactory for ChatProviderFactory {
    type Provider = ChatCompletionProvider;

    fn build(&self, model: &ModelConfig) -> Result<Self::Provider, LlmError> {
        let resolved = model.resolve()?;
        Ok(ChatCompletionProvider::with_timeout(resolved, self.timeout)?
            .with_max_retries(self.max_retries)
            .with_sampling(self.temperature, self.top_p))
    }
}

/// Factory handing out clones of one provider regardless of configuration
///
/// Provider names are still checked against the catalogue, so validation
/// behaves as it does with real providers.
#[derive(Debug, Clone)]
pub struct StaticProviderFactory<P> {
    provider: P,
}

impl<P> StaticProviderFactory<P> {
    /// Wrap a provider
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P> ProviderFactory for StaticProviderFactory<P>
where
    P: CompletionProvider<Error = LlmError> + Clone + Send + Sync + 'static,
{
    type Provider = P;

    fn build(&self, model: &ModelConfig) -> Result<Self::Provider, LlmError> {
        self.validate(model)?;
        Ok(self.provider.clone())
    }
}
