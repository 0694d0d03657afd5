//! Provider registry
//!
//! [`ProviderRegistry`] owns every configured [`ProviderClient`] and
//! dispatches generation requests with priority-ordered fallback: the
//! configured default first, then the configured fallbacks in order, then
//! every other registered provider in registration order. An explicit target
//! name restricts the attempt to that provider alone.
//!
//! [`ProviderFactory`] maps the `type` string of [`ProviderSettings`] to a
//! constructor; `openai` is installed by default.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::config::{ProviderSettings, ProvidersConfig};
use crate::error::{error_kind, ParleyError, Result};
use crate::events::{EventBus, EventKind};
use crate::health::PeriodicTask;
use crate::metrics::{record_fallback, CallKind, CallMetrics};
use crate::providers::base::{ChatTurn, Completion, GenerationOptions, ProviderClient, ProviderStats};
use crate::providers::openai::OpenAiProvider;

const EVENT_SOURCE: &str = "provider_registry";

/// Target label used in aggregate failures for generation calls.
pub const GENERATE_TARGET: &str = "generate";

/// Builds a provider from its registry name and settings
pub type ProviderConstructor =
    Arc<dyn Fn(&str, &ProviderSettings) -> Result<Arc<dyn ProviderClient>> + Send + Sync>;

/// Provider constructors keyed by type string
#[derive(Clone)]
pub struct ProviderFactory {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderFactory {
    /// A factory with no constructors installed.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A factory with the `openai` constructor installed.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register(
            "openai",
            Arc::new(|name: &str, settings: &ProviderSettings| {
                Ok(Arc::new(OpenAiProvider::new(name, settings)?) as Arc<dyn ProviderClient>)
            }),
        );
        factory
    }

    /// Install or replace the constructor for `kind`.
    pub fn register(&mut self, kind: &str, constructor: ProviderConstructor) {
        self.constructors.insert(kind.to_string(), constructor);
    }

    /// Build a provider for `settings`.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an unregistered type or settings the
    /// constructor rejects.
    pub fn create(&self, name: &str, settings: &ProviderSettings) -> Result<Arc<dyn ProviderClient>> {
        let constructor = self.constructors.get(&settings.provider_type).ok_or_else(|| {
            ParleyError::ValidationFailed(format!(
                "provider `{}` has unsupported type `{}`",
                name, settings.provider_type
            ))
        })?;
        constructor(name, settings)
    }
}

/// Aggregate registry stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistryStats {
    pub total: usize,
    pub connected: usize,
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderStats>,
}

/// Successful generation: which provider answered and what it said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub provider: String,
    pub completion: Completion,
}

/// Named collection of language-model providers
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use parley::config::ProvidersConfig;
/// use parley::events::EventBus;
/// use parley::providers::{ChatTurn, GenerationOptions, ProviderRegistry};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let registry = Arc::new(ProviderRegistry::new(ProvidersConfig::default(), Arc::new(EventBus::default())));
/// registry.start().await?;
/// let result = registry
///     .generate(&[ChatTurn::user("Hi")], &GenerationOptions::default(), None)
///     .await?;
/// println!("{}: {}", result.provider, result.completion.text);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ProviderRegistry {
    config: ProvidersConfig,
    factory: ProviderFactory,
    entries: RwLock<Vec<Arc<dyn ProviderClient>>>,
    events: Arc<EventBus>,
    health_task: Mutex<Option<PeriodicTask>>,
}

impl ProviderRegistry {
    pub fn new(config: ProvidersConfig, events: Arc<EventBus>) -> Self {
        Self::with_factory(config, ProviderFactory::with_defaults(), events)
    }

    pub fn with_factory(
        config: ProvidersConfig,
        factory: ProviderFactory,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            factory,
            entries: RwLock::new(Vec::new()),
            events,
            health_task: Mutex::new(None),
        }
    }

    /// Add and connect every configured provider, then start the health loop.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` if a configured entry is invalid.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for (name, settings) in &self.config.providers {
            self.add_provider(name, settings).await?;
        }

        let period = Duration::from_secs(self.config.health_check_interval_secs);
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("provider_health_check", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(registry) = weak.upgrade() {
                    let results = registry.health_check().await;
                    let healthy = results.values().filter(|ok| **ok).count();
                    tracing::debug!(healthy, total = results.len(), "provider health check");
                }
            }
        });
        if let Some(previous) = self.health_task.lock().await.replace(task) {
            previous.stop().await;
        }

        tracing::info!(
            providers = self.entries.read().await.len(),
            default = %self.config.default_provider,
            "provider registry started"
        );
        Ok(())
    }

    /// Stop the health loop and disconnect every provider.
    pub async fn stop(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.stop().await;
        }
        let entries = self.entries.read().await.clone();
        for provider in entries {
            if let Err(e) = provider.disconnect().await {
                tracing::warn!(provider = provider.name(), "disconnect failed: {:#}", e);
            }
            self.events.emit(
                EventKind::ProviderDisconnected,
                EVENT_SOURCE,
                json!({ "name": provider.name() }),
            );
        }
        tracing::info!("provider registry stopped");
    }

    /// Validate, register and connect a provider from settings.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for invalid settings, an unsupported type or a
    /// duplicate name. A failed connect is logged, not returned.
    pub async fn add_provider(&self, name: &str, settings: &ProviderSettings) -> Result<()> {
        let provider = self.factory.create(name, settings)?;
        self.add_client(provider).await
    }

    /// Register and connect a pre-built provider.
    pub async fn add_client(&self, provider: Arc<dyn ProviderClient>) -> Result<()> {
        let name = provider.name().to_string();
        {
            let mut entries = self.entries.write().await;
            if entries.iter().any(|p| p.name() == name) {
                return Err(ParleyError::ValidationFailed(format!(
                    "provider `{}` is already registered",
                    name
                ))
                .into());
            }
            entries.push(Arc::clone(&provider));
        }
        self.events
            .emit(EventKind::ProviderAdded, EVENT_SOURCE, json!({ "name": name }));

        match provider.connect().await {
            Ok(()) => self.events.emit(
                EventKind::ProviderConnected,
                EVENT_SOURCE,
                json!({ "name": name }),
            ),
            Err(e) => tracing::warn!(provider = %name, "failed to connect: {:#}", e),
        }
        Ok(())
    }

    /// Disconnect and unregister a provider.
    ///
    /// # Errors
    ///
    /// `NotFound` if no provider has that name.
    pub async fn remove_provider(&self, name: &str) -> Result<()> {
        let provider = {
            let mut entries = self.entries.write().await;
            let index = entries
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| ParleyError::NotFound(format!("provider `{}`", name)))?;
            entries.remove(index)
        };
        if let Err(e) = provider.disconnect().await {
            tracing::warn!(provider = %name, "disconnect failed: {:#}", e);
        }
        self.events
            .emit(EventKind::ProviderRemoved, EVENT_SOURCE, json!({ "name": name }));
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ProviderClient>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Registered names in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Default, then fallbacks in order, then the rest in registration order.
    pub async fn priority_order(&self) -> Vec<String> {
        let registered = self.names().await;
        let mut order: Vec<String> = Vec::with_capacity(registered.len());
        let preferred = std::iter::once(&self.config.default_provider)
            .chain(self.config.fallback_providers.iter());
        for name in preferred.chain(registered.iter()) {
            if registered.contains(name) && !order.contains(name) {
                order.push(name.clone());
            }
        }
        order
    }

    /// Generate a reply with fallback across providers.
    ///
    /// # Arguments
    ///
    /// * `turns` - Ordered conversation
    /// * `options` - Per-call overrides
    /// * `provider` - Explicit target; disables fallback
    ///
    /// # Errors
    ///
    /// - `NotFound` when the named provider is absent or none is registered
    /// - `AllCandidatesFailed` when every candidate failed
    pub async fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
        provider: Option<&str>,
    ) -> Result<GenerationResult> {
        let candidates = match provider {
            Some(name) => vec![self
                .get(name)
                .await
                .ok_or_else(|| ParleyError::NotFound(format!("provider `{}`", name)))?],
            None => {
                let mut candidates = Vec::new();
                for name in self.priority_order().await {
                    if let Some(p) = self.get(&name).await {
                        candidates.push(p);
                    }
                }
                candidates
            }
        };
        if candidates.is_empty() {
            return Err(ParleyError::NotFound("no providers are registered".to_string()).into());
        }

        let metrics = CallMetrics::new(CallKind::Provider, GENERATE_TARGET);
        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error: Option<anyhow::Error> = None;

        for candidate in candidates {
            let name = candidate.name().to_string();
            attempted.push(name.clone());

            if !candidate.is_connected() {
                if let Err(e) = candidate.connect().await {
                    tracing::warn!(provider = %name, "reconnect failed: {:#}", e);
                    record_fallback(CallKind::Provider, &name);
                    last_error = Some(e);
                    continue;
                }
                self.events.emit(
                    EventKind::ProviderConnected,
                    EVENT_SOURCE,
                    json!({ "name": name }),
                );
            }

            match candidate.generate(turns, options).await {
                Ok(completion) => {
                    metrics.record_success();
                    tracing::info!(provider = %name, "generated response");
                    return Ok(GenerationResult {
                        provider: name,
                        completion,
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = %name, "provider failed: {:#}", e);
                    self.events.emit(
                        EventKind::ProviderFailed,
                        EVENT_SOURCE,
                        json!({ "name": name, "error": e.to_string(), "kind": error_kind(&e) }),
                    );
                    record_fallback(CallKind::Provider, &name);
                    self.bounce(&candidate).await;
                    last_error = Some(e);
                }
            }
        }

        metrics.record_error("all_candidates_failed");
        let last_error = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "no candidates".to_string());
        tracing::error!(attempted = ?attempted, "all providers failed: {}", last_error);
        Err(ParleyError::AllCandidatesFailed {
            target: GENERATE_TARGET.to_string(),
            attempted,
            last_error,
        }
        .into())
    }

    async fn bounce(&self, provider: &Arc<dyn ProviderClient>) {
        let name = provider.name();
        if let Err(e) = provider.disconnect().await {
            tracing::debug!(provider = name, "disconnect during reconnect failed: {:#}", e);
        }
        match provider.connect().await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(provider = name, "reconnect failed: {:#}", e);
                self.events.emit(
                    EventKind::ProviderDisconnected,
                    EVENT_SOURCE,
                    json!({ "name": name }),
                );
            }
        }
    }

    /// Validate every provider; bounce the ones that fail while connected.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let entries = self.entries.read().await.clone();
        let mut results = BTreeMap::new();
        for provider in entries {
            let was_connected = provider.is_connected();
            let healthy = provider.validate_connection().await;
            if !healthy && was_connected {
                tracing::warn!(provider = provider.name(), "health check failed, reconnecting");
                self.bounce(&provider).await;
            }
            results.insert(provider.name().to_string(), healthy);
        }
        results
    }

    pub async fn stats(&self) -> ProviderRegistryStats {
        let entries = self.entries.read().await;
        let providers: BTreeMap<String, ProviderStats> = entries
            .iter()
            .map(|p| (p.name().to_string(), p.stats()))
            .collect();
        ProviderRegistryStats {
            total: entries.len(),
            connected: providers.values().filter(|s| s.connected).count(),
            default_provider: self.config.default_provider.clone(),
            providers,
        }
    }
}
