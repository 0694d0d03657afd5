//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from a YAML file and environment variables. The loaded
//! [`Config`] is constructed once at startup and passed down to the engine,
//! which hands each component the section it needs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::mcp::config::McpConfig;

/// Main configuration structure for Parley
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session lifetime and per-user limits
    #[serde(default)]
    pub session: SessionConfig,
    /// Strategy router behavior
    #[serde(default)]
    pub router: RouterConfig,
    /// Language-model providers
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// MCP tool servers
    #[serde(default)]
    pub servers: McpConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Session store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle seconds after which a session expires
    #[serde(default = "default_session_timeout")]
    pub timeout_secs: u64,

    /// Active sessions allowed per user before the oldest is evicted
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,

    /// Seconds between expiry sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_max_sessions_per_user() -> usize {
    10
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout(),
            max_sessions_per_user: default_max_sessions_per_user(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Strategy router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Words that send an otherwise unmatched request to the tool path
    #[serde(default = "default_mcp_keywords")]
    pub mcp_keywords: Vec<String>,

    /// Words that send an otherwise unmatched request to the model path
    #[serde(default = "default_llm_keywords")]
    pub llm_keywords: Vec<String>,

    /// Character budget for history included in model turns
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,

    /// Degrade tool failures to a partial reply instead of an error reply
    #[serde(default = "default_enable_mcp_fallback")]
    pub enable_mcp_fallback: bool,
}

fn default_mcp_keywords() -> Vec<String> {
    [
        "file", "directory", "list", "read", "write", "delete", "create", "search", "find",
        "execute", "run", "command", "system", "process", "database", "query", "sql", "api",
        "http", "request", "fetch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_llm_keywords() -> Vec<String> {
    [
        "explain", "help", "how", "what", "why", "when", "where", "who", "analyze", "summarize",
        "translate", "generate", "create", "write", "answer", "question", "discuss", "describe",
        "compare", "contrast",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_context_length() -> usize {
    4000
}

fn default_enable_mcp_fallback() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mcp_keywords: default_mcp_keywords(),
            llm_keywords: default_llm_keywords(),
            max_context_length: default_max_context_length(),
            enable_mcp_fallback: default_enable_mcp_fallback(),
        }
    }
}

/// Provider registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// First provider tried when no explicit target is given
    #[serde(default = "default_provider_name")]
    pub default_provider: String,

    /// Providers tried after the default, in order
    #[serde(default)]
    pub fallback_providers: Vec<String>,

    /// Seconds between health-check passes
    #[serde(default = "default_provider_health_interval")]
    pub health_check_interval_secs: u64,

    /// Providers by name
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_provider_health_interval() -> u64 {
    300
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider_name(),
            fallback_providers: Vec::new(),
            health_check_interval_secs: default_provider_health_interval(),
            providers: BTreeMap::new(),
        }
    }
}

/// Settings for one chat-completion provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSettings {
    /// Provider constructor key
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Credential given inline
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the credential
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model identifier sent with every request
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_provider_base_url")]
    pub base_url: String,

    /// Sent as the `OpenAI-Organization` header when present
    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request HTTP timeout
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_type() -> String {
    "openai".to_string()
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_provider_timeout() -> u64 {
    60
}

impl ProviderSettings {
    /// Settings for an OpenAI-compatible endpoint with the given model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: default_provider_type(),
            api_key: None,
            api_key_env: None,
            model: Some(model.into()),
            base_url: base_url.into(),
            organization: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_provider_timeout(),
        }
    }

    /// Resolve the credential, preferring the inline value.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::ValidationFailed`] when the credential or the
    /// model is missing, or the base URL does not parse.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.resolve_api_key().is_none() {
            return Err(ParleyError::ValidationFailed(format!(
                "provider `{}`: api_key is required",
                name
            ))
            .into());
        }
        if self.model.as_deref().map_or(true, |m| m.trim().is_empty()) {
            return Err(ParleyError::ValidationFailed(format!(
                "provider `{}`: model is required",
                name
            ))
            .into());
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            ParleyError::ValidationFailed(format!(
                "provider `{}`: invalid base_url `{}`: {}",
                name, self.base_url, e
            ))
        })?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ParleyError::ValidationFailed(format!(
                "provider `{}`: temperature must be between 0.0 and 2.0",
                name
            ))
            .into());
        }
        Ok(())
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration. A missing file yields
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(timeout) = std::env::var("PARLEY_SESSION_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse() {
                self.session.timeout_secs = value;
            } else {
                tracing::warn!("Invalid PARLEY_SESSION_TIMEOUT_SECS: {}", timeout);
            }
        }

        if let Ok(max) = std::env::var("PARLEY_MAX_SESSIONS_PER_USER") {
            if let Ok(value) = max.parse() {
                self.session.max_sessions_per_user = value;
            } else {
                tracing::warn!("Invalid PARLEY_MAX_SESSIONS_PER_USER: {}", max);
            }
        }

        if let Ok(provider) = std::env::var("PARLEY_DEFAULT_PROVIDER") {
            if !provider.trim().is_empty() {
                self.providers.default_provider = provider;
            }
        }

        if let Ok(fallback) = std::env::var("PARLEY_ENABLE_MCP_FALLBACK") {
            match fallback.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.router.enable_mcp_fallback = true,
                "0" | "false" | "no" => self.router.enable_mcp_fallback = false,
                _ => tracing::warn!("Invalid PARLEY_ENABLE_MCP_FALLBACK: {}", fallback),
            }
        }

        if let Ok(length) = std::env::var("PARLEY_MAX_CONTEXT_LENGTH") {
            if let Ok(value) = length.parse() {
                self.router.max_context_length = value;
            } else {
                tracing::warn!("Invalid PARLEY_MAX_CONTEXT_LENGTH: {}", length);
            }
        }

        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    ///
    /// Per-entry provider and server checks happen when the entries are
    /// added to their registries; this covers the global settings.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.session.timeout_secs == 0 {
            return Err(ParleyError::Config(
                "session.timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.max_sessions_per_user == 0 {
            return Err(ParleyError::Config(
                "session.max_sessions_per_user must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.cleanup_interval_secs == 0 {
            return Err(ParleyError::Config(
                "session.cleanup_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.router.max_context_length == 0 {
            return Err(ParleyError::Config(
                "router.max_context_length must be greater than 0".to_string(),
            )
            .into());
        }

        if !self.providers.providers.is_empty()
            && !self
                .providers
                .providers
                .contains_key(&self.providers.default_provider)
        {
            return Err(ParleyError::Config(format!(
                "default provider `{}` is not configured",
                self.providers.default_provider
            ))
            .into());
        }

        for fallback in &self.providers.fallback_providers {
            if !self.providers.providers.contains_key(fallback) {
                return Err(ParleyError::Config(format!(
                    "fallback provider `{}` is not configured",
                    fallback
                ))
                .into());
            }
        }

        Ok(())
    }
}
