//! Base provider trait and common types for Parley
//!
//! This module defines the [`ProviderClient`] trait that every language-model
//! backend implements, along with the chat turn, completion and usage types
//! exchanged with it.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Author of a chat turn or session message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the ordered conversation sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    /// Creates a new user turn
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::{ChatTurn, Role};
    ///
    /// let turn = ChatTurn::user("Hello, assistant!");
    /// assert_eq!(turn.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a new system turn
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::{ChatTurn, Role};
    ///
    /// let turn = ChatTurn::system("You are a helpful assistant");
    /// assert_eq!(turn.role, Role::System);
    /// ```
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Token usage information from a completion
///
/// Tracks the number of tokens used in prompts and completions,
/// as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: usize,
    /// Number of tokens in the completion
    #[serde(default)]
    pub completion_tokens: usize,
    /// Total tokens used (prompt + completion)
    #[serde(default)]
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create a new TokenUsage instance
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Per-call overrides of a provider's generation defaults
///
/// Unset fields fall back to the provider's configured `max_tokens` and
/// `temperature`; the sampling knobs are only sent when set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl GenerationOptions {
    /// Read `max_tokens` and `temperature` overrides from a routing blob.
    ///
    /// Values of the wrong type are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::GenerationOptions;
    ///
    /// let opts = GenerationOptions::from_routing(&serde_json::json!({"max_tokens": 64}));
    /// assert_eq!(opts.max_tokens, Some(64));
    /// assert_eq!(opts.temperature, None);
    /// ```
    pub fn from_routing(blob: &serde_json::Value) -> Self {
        Self {
            max_tokens: blob
                .get("max_tokens")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok()),
            temperature: blob
                .get("temperature")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32),
            ..Self::default()
        }
    }
}

/// Generated text plus what the provider reported about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Model that produced the text, as reported by the provider
    pub model: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Stats record for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub model: String,
    pub connected: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
}

/// One language-model backend
///
/// Implementations keep their own usage counters: every `generate` counts a
/// request and every failed one counts an error.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use parley::error::Result;
/// use parley::providers::{ChatTurn, Completion, GenerationOptions, ProviderClient, ProviderStats};
///
/// #[derive(Debug)]
/// struct Canned;
///
/// #[async_trait]
/// impl ProviderClient for Canned {
///     fn name(&self) -> &str { "canned" }
///     async fn connect(&self) -> Result<()> { Ok(()) }
///     async fn disconnect(&self) -> Result<()> { Ok(()) }
///     fn is_connected(&self) -> bool { true }
///     async fn get_models(&self) -> Result<Vec<String>> { Ok(vec!["m".into()]) }
///     async fn generate(&self, _turns: &[ChatTurn], _opts: &GenerationOptions) -> Result<Completion> {
///         Ok(Completion { text: "hi".into(), model: "m".into(), usage: None, finish_reason: None })
///     }
///     fn stats(&self) -> ProviderStats {
///         ProviderStats {
///             name: "canned".into(), provider_type: "canned".into(), model: "m".into(),
///             connected: true, last_used: None, request_count: 0, error_count: 0, success_rate: 0.0,
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ProviderClient: Send + Sync + fmt::Debug {
    /// Registry name of this provider.
    fn name(&self) -> &str;

    /// Authenticate by listing models; succeeds only on a non-empty list.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Model identifiers available to this credential.
    async fn get_models(&self) -> Result<Vec<String>>;

    /// Re-run [`ProviderClient::get_models`]; healthy when non-empty.
    async fn validate_connection(&self) -> bool {
        matches!(self.get_models().await, Ok(models) if !models.is_empty())
    }

    /// Generate a reply to the ordered `turns`.
    ///
    /// # Errors
    ///
    /// `UpstreamFailed` for a non-success HTTP status, `MalformedResponse`
    /// when the body has no choices, `ConnectionFailed` or `Timeout` when
    /// the request could not complete.
    async fn generate(&self, turns: &[ChatTurn], options: &GenerationOptions)
        -> Result<Completion>;

    fn stats(&self) -> ProviderStats;
}
