//! Strategy router
//!
//! [`StrategyRouter::route`] classifies a request and drives the tool
//! registry, the provider registry, or both:
//!
//! - tool only: extract a tool call, run it, format the result. A failure
//!   becomes a `partial` reply when tool fallback is enabled and an `error`
//!   reply otherwise.
//! - model only: send the system prompt, as much recent history as fits the
//!   character budget, and the request to the provider registry.
//! - hybrid: run the tool, then ask the model to explain its output. If the
//!   tool fails the model answers the original request.
//!
//! Routing never returns `Err`: every failure is folded into the [`Reply`].

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::RouterConfig;
use crate::error::{error_kind, Result};
use crate::mcp::{ServerRegistry, ToolCallResult};
use crate::metrics::{CallKind, CallMetrics};
use crate::providers::{ChatTurn, GenerationOptions, GenerationResult, ProviderRegistry};
use crate::routing::classifier::{Classifier, RuleClassifier, Strategy};
use crate::routing::context::Context;
use crate::routing::extract::{ToolExtractor, ToolRequest};
use crate::routing::reply::{format_tool_result, Reply};

/// Tool-routing key naming an explicit server target
pub const SERVER_KEY: &str = "server";
/// Metadata key carrying an optional system prompt
pub const SYSTEM_PROMPT_KEY: &str = "system_prompt";

#[derive(Debug)]
pub struct StrategyRouter {
    config: RouterConfig,
    classifier: Box<dyn Classifier>,
    extractor: ToolExtractor,
    servers: Arc<ServerRegistry>,
    providers: Arc<ProviderRegistry>,
}

/// Successful tool step
struct ToolOutcome {
    request: ToolRequest,
    result: ToolCallResult,
    text: String,
}

impl StrategyRouter {
    /// Router using the rule classifier built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile.
    pub fn new(
        config: RouterConfig,
        servers: Arc<ServerRegistry>,
        providers: Arc<ProviderRegistry>,
    ) -> Result<Self> {
        let classifier = Box::new(RuleClassifier::new(&config)?);
        Ok(Self {
            config,
            classifier,
            extractor: ToolExtractor::new()?,
            servers,
            providers,
        })
    }

    /// Swap in a different classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classify(&self, text: &str) -> Strategy {
        self.classifier.classify(text)
    }

    /// Handle one request.
    pub async fn route(&self, context: &Context) -> Reply {
        let strategy = self.classify(&context.text);
        let metrics = CallMetrics::new(CallKind::Message, strategy.as_str());
        tracing::info!(
            correlation_id = %context.correlation_id,
            strategy = strategy.as_str(),
            "routing message"
        );

        let reply = match strategy {
            Strategy::ToolOnly => self.tool_only(context).await,
            Strategy::ModelOnly => self.model_only(context).await,
            Strategy::Hybrid => self.hybrid(context).await,
        };

        match reply.error {
            None => metrics.record_success(),
            Some(_) => metrics.record_error(
                reply
                    .metadata
                    .get("error_type")
                    .and_then(Value::as_str)
                    .unwrap_or("other"),
            ),
        }
        reply.with_meta("processing_strategy", json!(strategy.as_str()))
    }

    async fn run_tool(
        &self,
        context: &Context,
    ) -> std::result::Result<ToolOutcome, (ToolRequest, anyhow::Error)> {
        let request = self.extractor.extract(&context.text);
        let server = context.tool_routing.get(SERVER_KEY).and_then(Value::as_str);
        tracing::debug!(tool = %request.tool, server, "calling tool");

        match self
            .servers
            .call_tool(&request.tool, request.arguments.clone(), server)
            .await
        {
            Ok(result) => {
                let text = format_tool_result(&result.value);
                Ok(ToolOutcome {
                    request,
                    result,
                    text,
                })
            }
            Err(e) => Err((request, e)),
        }
    }

    async fn tool_only(&self, context: &Context) -> Reply {
        match self.run_tool(context).await {
            Ok(outcome) => Reply::success(outcome.text, &context.correlation_id)
                .with_meta("tool_used", json!(outcome.request.tool))
                .with_meta("server", json!(outcome.result.server)),
            Err((request, e)) => {
                let error = format!("{:#}", e);
                tracing::warn!(tool = %request.tool, "tool path failed: {}", error);
                let reply = if self.config.enable_mcp_fallback {
                    Reply::partial(&error, &context.correlation_id)
                } else {
                    Reply::error(&error, &context.correlation_id)
                };
                reply
                    .with_meta("tool_used", json!(request.tool))
                    .with_meta("error_type", json!(error_kind(&e)))
            }
        }
    }

    async fn model_only(&self, context: &Context) -> Reply {
        self.generate_reply(context, &context.text).await
    }

    async fn hybrid(&self, context: &Context) -> Reply {
        match self.run_tool(context).await {
            Ok(outcome) => {
                let prompt = format!(
                    "Based on this information: {}\n\nPlease analyze and explain: {}",
                    outcome.text, context.text
                );
                self.generate_reply(context, &prompt)
                    .await
                    .with_meta("tool_used", json!(outcome.request.tool))
                    .with_meta("server", json!(outcome.result.server))
            }
            Err((request, e)) => {
                tracing::warn!(
                    tool = %request.tool,
                    "tool step failed, answering without it: {:#}",
                    e
                );
                self.generate_reply(context, &context.text)
                    .await
                    .with_meta("tool_error", json!(format!("{:#}", e)))
            }
        }
    }

    async fn generate_reply(&self, context: &Context, message: &str) -> Reply {
        let turns = self.build_turns(context, message);
        let options = GenerationOptions::from_routing(&Value::Object(context.model_routing.clone()));

        match self
            .providers
            .generate(&turns, &options, context.provider.as_deref())
            .await
        {
            Ok(GenerationResult {
                provider,
                completion,
            }) => {
                let mut reply = Reply::success(completion.text, &context.correlation_id)
                    .with_meta("provider", json!(provider))
                    .with_meta("model", json!(completion.model));
                if let Some(usage) = completion.usage {
                    reply = reply.with_meta("usage", json!(usage));
                }
                reply
            }
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::error!(
                    correlation_id = %context.correlation_id,
                    "model path failed: {}",
                    error
                );
                Reply::error(&error, &context.correlation_id)
                    .with_meta("error_type", json!(error_kind(&e)))
            }
        }
    }

    /// System prompt, then the newest history that fits the character
    /// budget (kept in order), then `message` as the final user turn.
    pub fn build_turns(&self, context: &Context, message: &str) -> Vec<ChatTurn> {
        let mut turns = Vec::new();
        if let Some(prompt) = context.metadata_str(SYSTEM_PROMPT_KEY) {
            turns.push(ChatTurn::system(prompt));
        }

        let mut used = 0;
        let mut recent = Vec::new();
        for msg in context.prior_history().iter().rev() {
            let len = msg.content.chars().count();
            if used + len > self.config.max_context_length {
                break;
            }
            used += len;
            recent.push(ChatTurn {
                role: msg.role,
                content: msg.content.clone(),
            });
        }
        recent.reverse();
        turns.extend(recent);

        turns.push(ChatTurn::user(message));
        turns
    }
}
