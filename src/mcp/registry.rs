//! Tool server registry
//!
//! [`ServerRegistry`] owns every configured tool server handle, keeps them
//! connected, and dispatches `tools/call` with priority-ordered fallback:
//!
//! 1. An explicit server name restricts the candidates to that one entry,
//!    whether or not it advertises the tool.
//! 2. Otherwise the candidates are the entries whose last-known capability
//!    map lists the tool, in registration order.
//! 3. Each candidate is reconnected if needed and called; on failure it is
//!    bounced (disconnect + connect, best effort) and the next one is tried.
//! 4. The first success wins. If every candidate fails the caller receives
//!    [`ParleyError::AllCandidatesFailed`] carrying the last error.
//!
//! A periodic health check validates every entry and bounces the ones that
//! fail while marked connected.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::error::{error_kind, ParleyError, Result};
use crate::events::{EventBus, EventKind};
use crate::health::PeriodicTask;
use crate::mcp::config::{McpConfig, ServerConfig};
use crate::mcp::server::{ServerFactory, ServerStats, ToolServerHandle};
use crate::mcp::types::{McpResource, McpTool, CAPABILITY_TOOLS};
use crate::metrics::{record_fallback, CallKind, CallMetrics};

const EVENT_SOURCE: &str = "server_registry";

/// Successful tool call: which server answered and its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub server: String,
    pub value: serde_json::Value,
}

/// Aggregate registry stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub connected: usize,
    pub servers: BTreeMap<String, ServerStats>,
}

/// Named collection of tool server handles
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use parley::events::EventBus;
/// use parley::mcp::config::McpConfig;
/// use parley::mcp::registry::ServerRegistry;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let registry = Arc::new(ServerRegistry::new(McpConfig::default(), Arc::new(EventBus::default())));
/// registry.start().await?;
/// let result = registry.call_tool("list_files", serde_json::json!({"path": "."}), None).await?;
/// println!("{} answered {}", result.server, result.value);
/// registry.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ServerRegistry {
    config: McpConfig,
    factory: ServerFactory,
    entries: RwLock<Vec<Arc<dyn ToolServerHandle>>>,
    events: Arc<EventBus>,
    health_task: Mutex<Option<PeriodicTask>>,
}

impl ServerRegistry {
    pub fn new(config: McpConfig, events: Arc<EventBus>) -> Self {
        Self::with_factory(config, ServerFactory::with_defaults(), events)
    }

    /// Registry using a caller-supplied constructor set.
    pub fn with_factory(config: McpConfig, factory: ServerFactory, events: Arc<EventBus>) -> Self {
        Self {
            config,
            factory,
            entries: RwLock::new(Vec::new()),
            events,
            health_task: Mutex::new(None),
        }
    }

    /// Add and connect every configured server, then start the health loop.
    ///
    /// A server that fails to connect stays registered and is retried by
    /// the health loop and by call dispatch.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if a configured entry is invalid.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for (name, server) in &self.config.servers {
            self.add_server(name, server).await?;
        }

        let period = Duration::from_secs(self.config.health_check_interval_secs);
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("server_health_check", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(registry) = weak.upgrade() {
                    let results = registry.health_check().await;
                    let healthy = results.values().filter(|ok| **ok).count();
                    tracing::debug!(healthy, total = results.len(), "server health check");
                }
            }
        });
        if let Some(previous) = self.health_task.lock().await.replace(task) {
            previous.stop().await;
        }

        let entries = self.entries.read().await;
        tracing::info!(
            total = entries.len(),
            connected = entries.iter().filter(|e| e.is_connected()).count(),
            "server registry started"
        );
        Ok(())
    }

    /// Stop the health loop and disconnect every entry.
    pub async fn stop(&self) {
        if let Some(task) = self.health_task.lock().await.take() {
            task.stop().await;
        }
        let entries = self.entries.read().await.clone();
        for handle in entries {
            if let Err(e) = handle.disconnect().await {
                tracing::warn!(server = handle.name(), "disconnect failed: {:#}", e);
            }
            self.events.emit(
                EventKind::ServerDisconnected,
                EVENT_SOURCE,
                json!({ "name": handle.name() }),
            );
        }
        tracing::info!("server registry stopped");
    }

    /// Validate, register and connect a server from configuration.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an invalid entry, an unsupported type or a
    /// duplicate name. A failed connect is logged, not returned.
    pub async fn add_server(&self, name: &str, config: &ServerConfig) -> Result<()> {
        let handle = self.factory.create(name, config)?;
        self.add_handle(handle).await
    }

    /// Register and connect a pre-built handle.
    pub async fn add_handle(&self, handle: Arc<dyn ToolServerHandle>) -> Result<()> {
        let name = handle.name().to_string();
        {
            let mut entries = self.entries.write().await;
            if entries.iter().any(|e| e.name() == name) {
                return Err(ParleyError::ValidationFailed(format!(
                    "server `{}` is already registered",
                    name
                ))
                .into());
            }
            entries.push(Arc::clone(&handle));
        }
        self.events
            .emit(EventKind::ServerAdded, EVENT_SOURCE, json!({ "name": name }));

        match handle.connect().await {
            Ok(()) => self.events.emit(
                EventKind::ServerConnected,
                EVENT_SOURCE,
                json!({ "name": name }),
            ),
            Err(e) => tracing::warn!(server = %name, "failed to connect: {:#}", e),
        }
        Ok(())
    }

    /// Disconnect and unregister a server.
    ///
    /// # Errors
    ///
    /// `NotFound` if no server has that name.
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let handle = {
            let mut entries = self.entries.write().await;
            let index = entries
                .iter()
                .position(|e| e.name() == name)
                .ok_or_else(|| ParleyError::NotFound(format!("server `{}`", name)))?;
            entries.remove(index)
        };
        if let Err(e) = handle.disconnect().await {
            tracing::warn!(server = %name, "disconnect failed: {:#}", e);
        }
        self.events.emit(
            EventKind::ServerDisconnected,
            EVENT_SOURCE,
            json!({ "name": name }),
        );
        self.events
            .emit(EventKind::ServerRemoved, EVENT_SOURCE, json!({ "name": name }));
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ToolServerHandle>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    /// Registered names in registration order.
    pub async fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    async fn candidates(
        &self,
        tool: &str,
        server: Option<&str>,
    ) -> Result<Vec<Arc<dyn ToolServerHandle>>> {
        if let Some(server) = server {
            return self
                .get(server)
                .await
                .map(|handle| vec![handle])
                .ok_or_else(|| ParleyError::NotFound(format!("server `{}`", server)).into());
        }

        let candidates: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.capabilities().advertises(CAPABILITY_TOOLS, tool))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(
                ParleyError::NotFound(format!("no server provides tool `{}`", tool)).into(),
            );
        }
        Ok(candidates)
    }

    /// Call `tool` with fallback across the servers that provide it.
    ///
    /// # Arguments
    ///
    /// * `tool` - Tool name
    /// * `arguments` - Tool argument object
    /// * `server` - Explicit target; bypasses the tool-presence filter
    ///
    /// # Errors
    ///
    /// - `NotFound` when the named server is absent or no server lists the tool
    /// - `AllCandidatesFailed` when every candidate failed
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        server: Option<&str>,
    ) -> Result<ToolCallResult> {
        let candidates = self.candidates(tool, server).await?;
        let metrics = CallMetrics::new(CallKind::Tool, tool);
        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error: Option<anyhow::Error> = None;

        for handle in candidates {
            let name = handle.name().to_string();
            attempted.push(name.clone());

            if !handle.is_connected() {
                tracing::debug!(server = %name, "reconnecting before tool call");
                if let Err(e) = handle.connect().await {
                    tracing::warn!(server = %name, tool, "reconnect failed: {:#}", e);
                    record_fallback(CallKind::Tool, &name);
                    last_error = Some(e);
                    continue;
                }
                self.events.emit(
                    EventKind::ServerConnected,
                    EVENT_SOURCE,
                    json!({ "name": name }),
                );
            }

            match handle.call_tool(tool, arguments.clone()).await {
                Ok(value) => {
                    metrics.record_success();
                    tracing::debug!(server = %name, tool, "tool call succeeded");
                    return Ok(ToolCallResult {
                        server: name,
                        value,
                    });
                }
                Err(e) => {
                    tracing::warn!(server = %name, tool, "tool call failed: {:#}", e);
                    self.events.emit(
                        EventKind::ToolCallFailed,
                        EVENT_SOURCE,
                        json!({ "server": name, "tool": tool, "error": e.to_string(), "kind": error_kind(&e) }),
                    );
                    record_fallback(CallKind::Tool, &name);
                    self.bounce(&handle).await;
                    last_error = Some(e);
                }
            }
        }

        metrics.record_error("all_candidates_failed");
        let last_error = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "no candidates".to_string());
        tracing::error!(tool, attempted = ?attempted, "all servers failed: {}", last_error);
        Err(ParleyError::AllCandidatesFailed {
            target: tool.to_string(),
            attempted,
            last_error,
        }
        .into())
    }

    /// Disconnect then reconnect one entry; errors are logged and swallowed.
    async fn bounce(&self, handle: &Arc<dyn ToolServerHandle>) {
        let name = handle.name();
        if let Err(e) = handle.disconnect().await {
            tracing::debug!(server = name, "disconnect during reconnect failed: {:#}", e);
        }
        self.events.emit(
            EventKind::ServerDisconnected,
            EVENT_SOURCE,
            json!({ "name": name }),
        );
        match handle.connect().await {
            Ok(()) => self.events.emit(
                EventKind::ServerConnected,
                EVENT_SOURCE,
                json!({ "name": name }),
            ),
            Err(e) => tracing::warn!(server = name, "reconnect failed: {:#}", e),
        }
    }

    /// Validate every entry; bounce the ones that fail while connected.
    ///
    /// Returns name to validation result.
    pub async fn health_check(&self) -> BTreeMap<String, bool> {
        let entries = self.entries.read().await.clone();
        let mut results = BTreeMap::new();
        for handle in entries {
            let was_connected = handle.is_connected();
            let healthy = handle.validate_connection().await;
            if !healthy && was_connected {
                tracing::warn!(server = handle.name(), "health check failed, reconnecting");
                self.bounce(&handle).await;
            }
            results.insert(handle.name().to_string(), healthy);
        }
        results
    }

    /// Tools of every connected server, keyed by server name.
    pub async fn all_tools(&self) -> BTreeMap<String, Vec<McpTool>> {
        let entries = self.entries.read().await.clone();
        let mut all = BTreeMap::new();
        for handle in entries.into_iter().filter(|e| e.is_connected()) {
            match handle.list_tools().await {
                Ok(tools) => {
                    all.insert(handle.name().to_string(), tools);
                }
                Err(e) => tracing::warn!(server = handle.name(), "tools/list failed: {:#}", e),
            }
        }
        all
    }

    /// Resources of every connected server, keyed by server name.
    pub async fn all_resources(&self) -> BTreeMap<String, Vec<McpResource>> {
        let entries = self.entries.read().await.clone();
        let mut all = BTreeMap::new();
        for handle in entries.into_iter().filter(|e| e.is_connected()) {
            match handle.list_resources().await {
                Ok(resources) => {
                    all.insert(handle.name().to_string(), resources);
                }
                Err(e) => {
                    tracing::warn!(server = handle.name(), "resources/list failed: {:#}", e)
                }
            }
        }
        all
    }

    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let servers: BTreeMap<String, ServerStats> = entries
            .iter()
            .map(|e| (e.name().to_string(), e.stats()))
            .collect();
        RegistryStats {
            total: entries.len(),
            connected: servers.values().filter(|s| s.connected).count(),
            servers,
        }
    }
}
