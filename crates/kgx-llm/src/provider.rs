//! Provider catalogue and per-task model configuration
//!
//! Each supported provider has a default base URL, a default model and an
//! environment variable holding its API key. A task's [`ModelConfig`] may
//! override any of them; [`ModelConfig::resolve`] fills the gaps.

use crate::LlmError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable overriding the forward provider's base URL
pub const FORWARD_BASE_URL_ENV: &str = "FORWARD_BASE_URL";

/// Environment variable overriding the forward provider's default model
pub const FORWARD_MODEL_ENV: &str = "FORWARD_DEFAULT_MODEL";

/// Supported OpenAI-compatible providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// DeepSeek hosted API
    DeepSeek,
    /// Qwen through the DashScope compatible-mode endpoint
    Qwen,
    /// Any OpenAI-compatible relay, configured through the environment
    Forward,
}

impl ProviderKind {
    /// All catalogue entries
    pub const ALL: [ProviderKind; 3] = [ProviderKind::DeepSeek, ProviderKind::Qwen, ProviderKind::Forward];

    /// Catalogue name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Forward => "forward",
        }
    }

    /// Environment variable consulted when no API key is supplied
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::Qwen => "DASHSCOPE_API_KEY",
            ProviderKind::Forward => "FORWARD_API_KEY",
        }
    }

    fn default_base_url(&self, env: &dyn Fn(&str) -> Option<String>) -> String {
        match self {
            ProviderKind::DeepSeek => "https://api.deepseek.com".to_string(),
            ProviderKind::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            ProviderKind::Forward => env(FORWARD_BASE_URL_ENV)
                .unwrap_or_else(|| "http://localhost:3000/v1".to_string()),
        }
    }

    fn default_model(&self, env: &dyn Fn(&str) -> Option<String>) -> String {
        match self {
            ProviderKind::DeepSeek => "deepseek-chat".to_string(),
            ProviderKind::Qwen => "qwen2.5-72b-instruct".to_string(),
            ProviderKind::Forward => {
                env(FORWARD_MODEL_ENV).unwrap_or_else(|| "gpt-4o-mini".to_string())
            }
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| LlmError::UnknownProvider(s.to_string()))
    }
}

/// Model configuration supplied with a task
///
/// Unset fields fall back to the provider's catalogue defaults. The API key
/// is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name, e.g. `deepseek`
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key; falls back to the provider's environment variable
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_provider() -> String {
    ProviderKind::DeepSeek.as_str().to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key: None,
        }
    }
}

impl ModelConfig {
    /// Configuration for a provider with all defaults
    pub fn for_provider(kind: ProviderKind) -> Self {
        Self {
            provider: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Look the provider name up in the catalogue
    pub fn kind(&self) -> Result<ProviderKind, LlmError> {
        self.provider.parse()
    }

    /// Resolve against the catalogue and the process environment
    pub fn resolve(&self) -> Result<ResolvedModel, LlmError> {
        self.resolve_with(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(&self, env: F) -> Result<ResolvedModel, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = self.kind()?;

        let api_key = match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => env(kind.api_key_env()).ok_or_else(|| LlmError::MissingApiKey {
                provider: kind.as_str().to_string(),
                env_var: kind.api_key_env().to_string(),
            })?,
        };

        let base_url = non_empty(self.base_url.as_deref())
            .unwrap_or_else(|| kind.default_base_url(&env));
        let model = non_empty(self.model.as_deref()).unwrap_or_else(|| kind.default_model(&env));

        Ok(ResolvedModel {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A fully resolved endpoint, model and credential
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Catalogue entry this was resolved from
    pub kind: ProviderKind,
    /// Base URL without trailing slash
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key
    pub api_key: String,
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
