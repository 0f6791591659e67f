//! Configuration file parsing for the server
//!
//! One TOML file carries the bind address, logging and paging settings plus
//! the nested `[service]` and `[extractor]` tables.

use kgx_extractor::ExtractorConfig;
use kgx_tasks::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Server configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Default log directive, overridden by `RUST_LOG`
    pub log_level: String,

    /// Page size when a listing request gives none
    pub default_page_size: usize,

    /// Largest page size a listing request may ask for
    pub max_page_size: usize,

    /// Task service settings
    pub service: ServiceConfig,

    /// Chunking and completion settings
    pub extractor: ExtractorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            default_page_size: 10,
            max_page_size: 100,
            service: ServiceConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check paging bounds and the nested tables
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(ConfigError::Invalid(
                "page sizes must be greater than 0".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        self.service
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.extractor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Get the full bind address (address:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_parse_toml_with_nested_tables() {
        let toml = r#"
            host = "0.0.0.0"
            port = 9000
            log_level = "kgx=debug"

            [service]
            max_workers = 5
            upload_dir = "/srv/uploads"

            [extractor]
            max_chunk_size = 1200
            overlap_size = 150
        "#;

        let config = ServerConfig::from_toml(toml).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.log_level, "kgx=debug");
        assert_eq!(config.service.max_workers, 5);
        assert_eq!(config.service.retention_days, 7);
        assert_eq!(config.extractor.max_chunk_size, 1200);
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn test_invalid_nested_table_rejected() {
        let toml = r#"
            [extractor]
            max_chunk_size = 100
            overlap_size = 100
        "#;
        assert!(matches!(
            ServerConfig::from_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_page_sizes_checked() {
        let config = ServerConfig {
            default_page_size: 50,
            max_page_size: 20,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ServerConfig::from_file("/nonexistent/kgx.toml"),
            Err(ConfigError::FileRead(_))
        ));
    }
}
