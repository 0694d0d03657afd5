//! Tool server handles
//!
//! A tool server handle wraps one [`Transport`] and the bookkeeping the
//! registry needs: the capability map returned by `initialize`, the tool and
//! resource descriptors listed since, and usage counters for `tools/call`.
//!
//! [`ToolServerHandle`] is the seam the registry dispatches through;
//! [`McpServer`] is the generic implementation. [`ServerFactory`] maps the
//! `type` string of a [`ServerConfig`] to a constructor so that additional
//! handle kinds can be registered without touching the registry.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::mcp::config::ServerConfig;
use crate::mcp::transport::{Transport, TransportRegistry};
use crate::mcp::types::{
    CallToolParams, Capabilities, InitializeParams, ListResourcesResponse, ListToolsResponse,
    McpResource, McpTool, CAPABILITY_RESOURCES, CAPABILITY_TOOLS, METHOD_INITIALIZE,
    METHOD_RESOURCES_LIST, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::stats::UsageCounters;

/// Handle type used when a server entry does not name one.
pub const DEFAULT_SERVER_TYPE: &str = "generic";

/// One tool server as seen by the registry
#[async_trait::async_trait]
pub trait ToolServerHandle: Send + Sync + std::fmt::Debug {
    /// Registry name of this server.
    fn name(&self) -> &str;

    /// Open the transport and negotiate capabilities.
    ///
    /// A failed `initialize` does not fail the connect; the handle falls back
    /// to empty `tools`, `resources` and `notifications` capabilities.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Issue `tools/list` and refresh the tool descriptors.
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Issue `resources/list` and refresh the resource descriptors.
    async fn list_resources(&self) -> Result<Vec<McpResource>>;

    /// Issue `tools/call`; updates the usage counters.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Cheap `tools/list` probe.
    async fn validate_connection(&self) -> bool;

    /// Last capability map retrieved from the server.
    fn capabilities(&self) -> Capabilities;

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().has(capability)
    }

    fn stats(&self) -> ServerStats;
}

/// Stats record for one tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub name: String,
    #[serde(rename = "type")]
    pub server_type: String,
    pub transport: String,
    pub connected: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub capabilities: Capabilities,
}

/// Generic MCP server handle over any [`Transport`]
///
/// # Examples
///
/// ```no_run
/// use parley::mcp::config::StdioTransportConfig;
/// use parley::mcp::server::{McpServer, ToolServerHandle};
/// use parley::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::new(StdioTransportConfig::new("my-mcp-server"));
/// let server = McpServer::new("files", "generic", Box::new(transport));
/// server.connect().await?;
/// let result = server.call_tool("list_files", serde_json::json!({"path": "."})).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct McpServer {
    name: String,
    server_type: String,
    transport: Box<dyn Transport>,
    capabilities: RwLock<Capabilities>,
    counters: UsageCounters,
}

impl McpServer {
    pub fn new(name: &str, server_type: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            server_type: server_type.to_string(),
            transport,
            capabilities: RwLock::new(Capabilities::default()),
            counters: UsageCounters::new(),
        }
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<R> {
        let value = self.transport.send_request(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            ParleyError::MalformedResponse(format!(
                "{} reply from `{}` has unexpected shape: {}",
                method, self.name, e
            ))
            .into()
        })
    }

    fn update_capabilities<F: FnOnce(&mut Capabilities)>(&self, f: F) {
        let mut caps = self
            .capabilities
            .write()
            .unwrap_or_else(|p| p.into_inner());
        f(&mut caps);
    }

    /// Returns the negotiated capabilities and whether the handshake succeeded.
    async fn initialize(&self) -> (Capabilities, bool) {
        let params = match serde_json::to_value(InitializeParams::default()) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(server = %self.name, "failed to encode initialize params: {}", e);
                return (Capabilities::fallback(), false);
            }
        };
        match self
            .transport
            .send_request(METHOD_INITIALIZE, Some(params))
            .await
        {
            Ok(result) => {
                let caps = Capabilities::from_initialize(&result);
                tracing::debug!(server = %self.name, capabilities = ?caps.names(), "initialized");
                (caps, true)
            }
            Err(e) => {
                tracing::warn!(
                    server = %self.name,
                    "initialize failed, assuming default capabilities: {:#}",
                    e
                );
                (Capabilities::fallback(), false)
            }
        }
    }
}

fn descriptor<T: Serialize>(item: &T) -> serde_json::Value {
    serde_json::to_value(item).unwrap_or_default()
}

#[async_trait::async_trait]
impl ToolServerHandle for McpServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.transport.connect().await?;

        let (caps, negotiated) = self.initialize().await;
        if !self.transport.is_connected() {
            return Err(ParleyError::ConnectionFailed(format!(
                "server `{}` dropped the connection during initialize",
                self.name
            ))
            .into());
        }
        let wants_tools = caps.has(CAPABILITY_TOOLS);
        let wants_resources = caps.has(CAPABILITY_RESOURCES);
        self.update_capabilities(|current| *current = caps);

        if negotiated {
            if wants_tools {
                if let Err(e) = self.list_tools().await {
                    tracing::debug!(server = %self.name, "tool discovery failed: {:#}", e);
                }
            }
            if wants_resources {
                if let Err(e) = self.list_resources().await {
                    tracing::debug!(server = %self.name, "resource discovery failed: {:#}", e);
                }
            }
        }

        tracing::info!(
            server = %self.name,
            transport = self.transport.kind(),
            "tool server connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let response: ListToolsResponse = self.request(METHOD_TOOLS_LIST, None).await?;
        self.update_capabilities(|caps| {
            caps.set_descriptors(
                CAPABILITY_TOOLS,
                response
                    .tools
                    .iter()
                    .map(|tool| (tool.name.clone(), descriptor(tool))),
            )
        });
        Ok(response.tools)
    }

    async fn list_resources(&self) -> Result<Vec<McpResource>> {
        let response: ListResourcesResponse = self.request(METHOD_RESOURCES_LIST, None).await?;
        self.update_capabilities(|caps| {
            caps.set_descriptors(
                CAPABILITY_RESOURCES,
                response
                    .resources
                    .iter()
                    .map(|res| (res.key().to_string(), descriptor(res))),
            )
        });
        Ok(response.resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.counters.record_request();
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let outcome = match serde_json::to_value(&params) {
            Ok(params) => {
                self.transport
                    .send_request(METHOD_TOOLS_CALL, Some(params))
                    .await
            }
            Err(e) => Err(ParleyError::from(e).into()),
        };
        if outcome.is_err() {
            self.counters.record_error();
        }
        outcome
    }

    async fn validate_connection(&self) -> bool {
        if !self.transport.is_connected() {
            return false;
        }
        self.transport
            .send_request(METHOD_TOOLS_LIST, None)
            .await
            .is_ok()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn stats(&self) -> ServerStats {
        let usage = self.counters.snapshot();
        ServerStats {
            name: self.name.clone(),
            server_type: self.server_type.clone(),
            transport: self.transport.kind().to_string(),
            connected: self.is_connected(),
            last_used: usage.last_used,
            request_count: usage.request_count,
            error_count: usage.error_count,
            success_rate: usage.success_rate,
            capabilities: self.capabilities(),
        }
    }
}

// ---------------------------------------------------------------------------
// Constructor registry
// ---------------------------------------------------------------------------

/// Builds a handle from its registry name, configuration and transport
pub type ServerConstructor =
    Arc<dyn Fn(&str, &ServerConfig, Box<dyn Transport>) -> Result<Arc<dyn ToolServerHandle>> + Send + Sync>;

/// Handle and transport constructors keyed by type string
///
/// # Examples
///
/// ```
/// use parley::mcp::config::{ServerConfig, StdioTransportConfig, TransportConfig};
/// use parley::mcp::server::ServerFactory;
///
/// let factory = ServerFactory::with_defaults();
/// let config = ServerConfig::new(TransportConfig::Stdio(StdioTransportConfig::new("cat")));
/// let handle = factory.create("files", &config).unwrap();
/// assert_eq!(handle.name(), "files");
/// ```
#[derive(Clone)]
pub struct ServerFactory {
    transports: TransportRegistry,
    handles: BTreeMap<String, ServerConstructor>,
}

impl std::fmt::Debug for ServerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFactory")
            .field("transports", &self.transports)
            .field("handles", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ServerFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ServerFactory {
    /// `generic` handles over the default `stdio` and `http` transports.
    pub fn with_defaults() -> Self {
        Self::with_transports(TransportRegistry::with_defaults())
    }

    /// `generic` handles over a caller-supplied transport registry.
    pub fn with_transports(transports: TransportRegistry) -> Self {
        let mut handles: BTreeMap<String, ServerConstructor> = BTreeMap::new();
        handles.insert(
            DEFAULT_SERVER_TYPE.to_string(),
            Arc::new(|name: &str, config: &ServerConfig, transport: Box<dyn Transport>| {
                Ok(Arc::new(McpServer::new(name, &config.server_type, transport))
                    as Arc<dyn ToolServerHandle>)
            }),
        );
        Self {
            transports,
            handles,
        }
    }

    /// Install or replace the handle constructor for `server_type`.
    pub fn register_handle(&mut self, server_type: &str, constructor: ServerConstructor) {
        self.handles.insert(server_type.to_string(), constructor);
    }

    pub fn transports_mut(&mut self) -> &mut TransportRegistry {
        &mut self.transports
    }

    /// Validate `config` and build a disconnected handle.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` for an invalid entry or an unregistered server or
    /// transport type.
    pub fn create(&self, name: &str, config: &ServerConfig) -> Result<Arc<dyn ToolServerHandle>> {
        config.validate(name)?;
        let constructor = self.handles.get(&config.server_type).ok_or_else(|| {
            ParleyError::ValidationFailed(format!(
                "server `{}` has unsupported type `{}`",
                name, config.server_type
            ))
        })?;
        let transport = self.transports.create(&config.transport)?;
        constructor(name, config, transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::mcp::config::{StdioTransportConfig, TransportConfig};
    use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
    use serde_json::json;

    fn fake_server() -> (McpServer, FakeTransportHandle) {
        let (transport, handle) = FakeTransport::new();
        (McpServer::new("files", "generic", Box::new(transport)), handle)
    }

    fn script_initialize(handle: &FakeTransportHandle) {
        handle.on("initialize", |params| {
            let params = params.cloned().unwrap_or_default();
            assert_eq!(params["protocolVersion"], "2024-11-05");
            assert_eq!(params["clientInfo"]["name"], "parley");
            Ok(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": { "name": "fake", "version": "0" }
            }))
        });
        handle.on("tools/list", |_| {
            Ok(json!({ "tools": [
                { "name": "list_files", "description": "List files", "inputSchema": {} },
                { "name": "read_file", "inputSchema": {} }
            ]}))
        });
    }

    #[tokio::test]
    async fn test_connect_discovers_tools() {
        let (server, handle) = fake_server();
        script_initialize(&handle);

        server.connect().await.unwrap();

        let caps = server.capabilities();
        assert!(caps.has("tools"));
        assert!(!caps.has("resources"));
        assert!(caps.advertises("tools", "list_files"));
        assert!(caps.advertises("tools", "read_file"));
        assert_eq!(caps.get("tools").unwrap().flags["listChanged"], true);
        assert_eq!(handle.call_count("resources/list"), 0);
    }

    #[tokio::test]
    async fn test_failed_initialize_falls_back_to_empty_capabilities() {
        let (server, handle) = fake_server();
        handle.on("initialize", |_| {
            Err(ParleyError::UpstreamFailed {
                code: -32603,
                message: "boom".into(),
            }
            .into())
        });

        server.connect().await.unwrap();

        assert_eq!(server.capabilities(), Capabilities::fallback());
        assert!(server.has_capability("tools"));
        assert!(server.has_capability("notifications"));
        assert!(!server.capabilities().advertises("tools", "list_files"));
        // No discovery after a failed handshake.
        assert_eq!(handle.call_count("tools/list"), 0);
    }

    #[tokio::test]
    async fn test_connection_lost_during_initialize_fails_connect() {
        let (server, handle) = fake_server();
        let peer = handle.clone();
        handle.on("initialize", move |_| {
            peer.drop_connection();
            Err(ParleyError::Timeout("no reply to initialize".into()).into())
        });

        let err = server.connect().await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert!(err.to_string().contains("during initialize"));
        assert!(!server.is_connected());
        assert_eq!(handle.call_count("tools/list"), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let (server, handle) = fake_server();
        handle.fail_next_connects(1);
        let err = server.connect().await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_call_tool_updates_counters() {
        let (server, handle) = fake_server();
        script_initialize(&handle);
        handle.on("tools/call", |params| {
            let params = params.cloned().unwrap_or_default();
            if params["name"] == "echo" {
                Ok(json!({ "content": params["arguments"]["text"] }))
            } else {
                Err(ParleyError::UpstreamFailed {
                    code: -32602,
                    message: "Unknown tool".into(),
                }
                .into())
            }
        });
        server.connect().await.unwrap();

        let result = server.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["content"], "hi");
        assert!(server.call_tool("missing", json!({})).await.is_err());

        let stats = server.stats();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.success_rate, 0.5);
        assert!(stats.last_used.is_some());
        assert_eq!(stats.transport, "fake");
    }

    #[tokio::test]
    async fn test_listing_does_not_touch_counters() {
        let (server, handle) = fake_server();
        script_initialize(&handle);
        server.connect().await.unwrap();
        server.list_tools().await.unwrap();
        assert_eq!(server.stats().request_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_tools_list_is_rejected() {
        let (server, handle) = fake_server();
        handle.on("tools/list", |_| Ok(json!({ "tools": "nope" })));
        server.connect().await.unwrap();
        let err = server.list_tools().await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_validate_connection() {
        let (server, handle) = fake_server();
        assert!(!server.validate_connection().await);

        script_initialize(&handle);
        server.connect().await.unwrap();
        assert!(server.validate_connection().await);

        handle.drop_connection();
        assert!(!server.validate_connection().await);
    }

    #[test]
    fn test_factory_rejects_unknown_server_type() {
        let factory = ServerFactory::with_defaults();
        let mut config = ServerConfig::new(TransportConfig::Stdio(StdioTransportConfig::new("cat")));
        config.server_type = "exotic".into();
        let err = factory.create("x", &config).unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ValidationFailed(_))));
    }

    #[test]
    fn test_factory_rejects_invalid_config_eagerly() {
        let factory = ServerFactory::with_defaults();
        let config = ServerConfig::new(TransportConfig::Stdio(StdioTransportConfig::new("")));
        let err = factory.create("x", &config).unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ValidationFailed(_))));
    }

    #[test]
    fn test_stats_serialize_type_field() {
        let (server, _handle) = fake_server();
        let value = serde_json::to_value(server.stats()).unwrap();
        assert_eq!(value["type"], "generic");
        assert_eq!(value["connected"], false);
    }
}
