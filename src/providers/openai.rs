//! OpenAI-compatible provider implementation for Parley
//!
//! This module implements [`ProviderClient`] for any endpoint speaking the
//! OpenAI chat-completions API:
//!
//! - `connect` / `validate_connection` list `GET <base>/models` and require a
//!   non-empty `data` array.
//! - `generate` posts `{model, messages, max_tokens, temperature, stream}` to
//!   `<base>/chat/completions` and returns `choices[0].message.content`.
//!
//! Every request carries `Authorization: Bearer <key>` and, when configured,
//! `OpenAI-Organization`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ProviderSettings;
use crate::error::{ParleyError, Result};
use crate::providers::base::{
    ChatTurn, Completion, GenerationOptions, ProviderClient, ProviderStats, Role, TokenUsage,
};
use crate::stats::UsageCounters;

/// OpenAI chat-completions provider
///
/// # Examples
///
/// ```no_run
/// use parley::config::ProviderSettings;
/// use parley::providers::{ChatTurn, GenerationOptions, OpenAiProvider, ProviderClient};
///
/// # async fn example() -> parley::error::Result<()> {
/// let mut settings = ProviderSettings::new("https://api.openai.com/v1", "gpt-3.5-turbo");
/// settings.api_key_env = Some("OPENAI_API_KEY".to_string());
///
/// let provider = OpenAiProvider::new("openai", &settings)?;
/// provider.connect().await?;
/// let completion = provider
///     .generate(&[ChatTurn::user("Hello!")], &GenerationOptions::default())
///     .await?;
/// println!("{}", completion.text);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    connected: AtomicBool,
    counters: UsageCounters,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiProvider {
    /// Validate `settings` and build the provider. No network I/O happens.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` when the credential or model is missing or the
    /// base URL is invalid; `ConnectionFailed` if the HTTP client cannot be
    /// built.
    pub fn new(name: &str, settings: &ProviderSettings) -> Result<Self> {
        settings.validate(name)?;
        let api_key = settings.resolve_api_key().ok_or_else(|| {
            ParleyError::ValidationFailed(format!("provider `{}`: api_key is required", name))
        })?;
        let model = settings.model.clone().ok_or_else(|| {
            ParleyError::ValidationFailed(format!("provider `{}`: model is required", name))
        })?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
            ParleyError::ValidationFailed(format!(
                "provider `{}`: api_key contains invalid header characters",
                name
            ))
        })?;
        headers.insert(AUTHORIZATION, bearer);
        if let Some(org) = settings.organization.as_deref().filter(|o| !o.is_empty()) {
            let value = HeaderValue::from_str(org).map_err(|_| {
                ParleyError::ValidationFailed(format!(
                    "provider `{}`: organization contains invalid header characters",
                    name
                ))
            })?;
            headers.insert("OpenAI-Organization", value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ParleyError::ConnectionFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            "Initialized OpenAI provider `{}`: base_url={}, model={}",
            name,
            settings.base_url,
            model
        );

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            connected: AtomicBool::new(false),
            counters: UsageCounters::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_error(&self, e: reqwest::Error) -> ParleyError {
        if e.is_timeout() {
            ParleyError::Timeout(format!("provider `{}` request timed out: {}", self.name, e))
        } else {
            ParleyError::ConnectionFailed(format!("provider `{}` request failed: {}", self.name, e))
        }
    }

    async fn post_completion(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role,
                    content: &t.content,
                })
                .collect(),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            temperature: options.temperature.unwrap_or(self.temperature),
            stream: false,
            top_p: options.top_p,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
            stop: options.stop.as_deref(),
        };

        tracing::debug!(
            provider = %self.name,
            turns = request.messages.len(),
            max_tokens = request.max_tokens,
            "sending chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(provider = %self.name, "API error {}: {}", status, error_text);
            return Err(ParleyError::UpstreamFailed {
                code: i64::from(status.as_u16()),
                message: if error_text.is_empty() {
                    status.to_string()
                } else {
                    error_text
                },
            }
            .into());
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            ParleyError::MalformedResponse(format!(
                "provider `{}` returned an unreadable completion: {}",
                self.name, e
            ))
        })?;
        let choice = body.choices.into_iter().next().ok_or_else(|| {
            ParleyError::MalformedResponse(format!(
                "provider `{}` returned no choices",
                self.name
            ))
        })?;

        if let Some(usage) = &body.usage {
            tracing::debug!(
                provider = %self.name,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion received"
            );
        }

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| self.model.clone()),
            usage: body.usage,
            finish_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let models = self.get_models().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            ParleyError::ConnectionFailed(format!("provider `{}`: {:#}", self.name, e))
        })?;
        if models.is_empty() {
            self.connected.store(false, Ordering::SeqCst);
            return Err(ParleyError::ConnectionFailed(format!(
                "provider `{}` reported no available models",
                self.name
            ))
            .into());
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            provider = %self.name,
            models = models.len(),
            "connected to provider"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(provider = %self.name, "disconnected from provider");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        tracing::debug!(provider = %self.name, "Fetching models: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(provider = %self.name, "model listing returned {}: {}", status, error_text);
            return Err(ParleyError::UpstreamFailed {
                code: i64::from(status.as_u16()),
                message: error_text,
            }
            .into());
        }

        let list: ModelList = response.json().await.map_err(|e| {
            ParleyError::MalformedResponse(format!(
                "provider `{}` returned an unreadable model list: {}",
                self.name, e
            ))
        })?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    async fn generate(&self, turns: &[ChatTurn], options: &GenerationOptions) -> Result<Completion> {
        if !self.is_connected() {
            return Err(ParleyError::ConnectionFailed(format!(
                "provider `{}` is not connected",
                self.name
            ))
            .into());
        }

        self.counters.record_request();
        let outcome = self.post_completion(turns, options).await;
        if outcome.is_err() {
            self.counters.record_error();
        }
        outcome
    }

    fn stats(&self) -> ProviderStats {
        let usage = self.counters.snapshot();
        ProviderStats {
            name: self.name.clone(),
            provider_type: "openai".to_string(),
            model: self.model.clone(),
            connected: self.is_connected(),
            last_used: usage.last_used,
            request_count: usage.request_count,
            error_count: usage.error_count,
            success_rate: usage.success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use serde_json::json;

    fn settings() -> ProviderSettings {
        let mut settings = ProviderSettings::new("http://127.0.0.1:9/v1/", "gpt-test");
        settings.api_key = Some("sk-test".to_string());
        settings
    }

    #[test]
    fn test_new_trims_base_url() {
        let provider = OpenAiProvider::new("openai", &settings()).unwrap();
        assert_eq!(provider.base_url(), "http://127.0.0.1:9/v1");
        assert_eq!(provider.model(), "gpt-test");
        assert!(!provider.is_connected());
    }

    #[test]
    fn test_new_requires_credentials() {
        let mut settings = settings();
        settings.api_key = None;
        let err = OpenAiProvider::new("openai", &settings).unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ValidationFailed(_))));
    }

    #[test]
    fn test_new_requires_model() {
        let mut settings = settings();
        settings.model = None;
        let err = OpenAiProvider::new("openai", &settings).unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn test_generate_requires_connection() {
        let provider = OpenAiProvider::new("openai", &settings()).unwrap();
        let err = provider
            .generate(&[ChatTurn::user("hi")], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert_eq!(provider.stats().request_count, 0);
    }

    #[test]
    fn test_request_body_shape() {
        let turns = vec![ChatTurn::system("be brief"), ChatTurn::user("hi")];
        let stop = vec!["\n".to_string()];
        let request = ChatRequest {
            model: "gpt-test",
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role,
                    content: &t.content,
                })
                .collect(),
            max_tokens: 10,
            temperature: 0.5,
            stream: false,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: Some(0.1),
            stop: Some(stop.as_slice()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(value["stream"], false);
        assert!(value.get("top_p").is_none());
        assert_eq!(value["stop"], json!(["\n"]));
    }

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let body: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
        }))
        .unwrap();
        assert!(body.usage.is_none());
        assert_eq!(body.choices[0].message.content.as_deref(), Some("hello"));
    }
}
