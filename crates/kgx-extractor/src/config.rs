//! Configuration for the Extractor

use crate::error::ExtractorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for chunking and completion calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Maximum chunk size (characters)
    pub max_chunk_size: usize,

    /// Target overlap between consecutive chunks (characters)
    pub overlap_size: usize,

    /// Maximum time for a single completion call (seconds)
    pub completion_timeout_secs: u64,

    /// Attempts per chunk for retryable provider failures
    pub max_retries: u32,

    /// Sampling temperature sent to the provider
    pub temperature: f32,

    /// Nucleus sampling parameter sent to the provider
    pub top_p: f32,
}

impl ExtractorConfig {
    /// Get the completion timeout as a Duration
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ExtractorError> {
        if self.max_chunk_size == 0 {
            return Err(ExtractorError::Config(
                "max_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(ExtractorError::Config(format!(
                "overlap_size ({}) must be smaller than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            )));
        }
        if self.completion_timeout_secs == 0 {
            return Err(ExtractorError::Config(
                "completion_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ExtractorError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ExtractorError::Config(
                "temperature must be within [0, 2]".to_string(),
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ExtractorError::Config(
                "top_p must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExtractorConfig {
    /// Default configuration with balanced settings
    fn default() -> Self {
        Self {
            max_chunk_size: 800,
            overlap_size: 100,
            completion_timeout_secs: 120,
            max_retries: 2,
            temperature: 0.0,
            top_p: 1.0,
        }
    }
}

impl ExtractorConfig {
    /// Aggressive preset: small chunks and short timeouts for fast endpoints
    pub fn aggressive() -> Self {
        Self {
            max_chunk_size: 400,
            overlap_size: 50,
            completion_timeout_secs: 60,
            max_retries: 1,
            ..Self::default()
        }
    }

    /// Lenient preset: large chunks and long timeouts for slow endpoints
    pub fn lenient() -> Self {
        Self {
            max_chunk_size: 2_000,
            overlap_size: 200,
            completion_timeout_secs: 300,
            max_retries: 3,
            ..Self::default()
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ExtractorError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ExtractorError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String, ExtractorError> {
        toml::to_string_pretty(self)
            .map_err(|e| ExtractorError::Config(format!("Failed to serialize to TOML: {}", e)))
    }
}
