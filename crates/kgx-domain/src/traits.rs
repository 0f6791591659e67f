//! Trait definitions for external interactions
//!
//! These traits define the boundaries between domain logic and infrastructure.
//! Implementations live in other crates.

/// The text-completion collaborator
///
/// One call per chunk: the caller's prompt plus the chunk text go out, the
/// model's free-text reply comes back. Calls block the calling thread until
/// the reply or the provider's own timeout, so async callers run them on a
/// blocking pool.
///
/// Implemented by the infrastructure layer (kgx-llm)
pub trait CompletionProvider {
    /// Error type for completion calls
    type Error;

    /// Send `prompt` and `text` to the model and return its reply
    fn complete(&self, prompt: &str, text: &str) -> Result<String, Self::Error>;

    /// Model name used for logging
    fn model_name(&self) -> &str {
        "unknown"
    }
}
