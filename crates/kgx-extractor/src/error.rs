//! Error types for the Extractor

use thiserror::Error;

/// Errors that can occur while extracting one file
///
/// Every variant fails the current file only; the task layer records the
/// message and moves on to the next file.
#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The input file could not be read
    #[error("Failed to read {path}: {message}")]
    FileAcquisition {
        /// Path that was read
        path: String,
        /// Underlying cause
        message: String,
    },

    /// Completion call failed for a chunk
    #[error("Completion failed on chunk {chunk_index}: {message}")]
    Completion {
        /// Chunk being processed when the call failed
        chunk_index: usize,
        /// Provider error
        message: String,
    },

    /// Completion call exceeded the configured timeout
    #[error("Completion timed out on chunk {chunk_index} after {timeout_secs}s")]
    Timeout {
        /// Chunk being processed when the call timed out
        chunk_index: usize,
        /// Configured timeout
        timeout_secs: u64,
    },

    /// Writing an output artifact failed
    #[error("Failed to write artifact {path}: {message}")]
    Artifact {
        /// Artifact path
        path: String,
        /// Underlying cause
        message: String,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The blocking completion task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}
