//! MCP protocol types and JSON-RPC 2.0 primitives
//!
//! This module defines the wire types exchanged with tool servers (protocol
//! revision **2024-11-05**) and the typed [`Capabilities`] map a server
//! handle keeps for the registry. Struct fields are `camelCase` on the wire
//! via `#[serde(rename_all = "camelCase")]`, and `Option<>` fields omit their
//! key from JSON when `None`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Lifecycle: client sends `initialize` to negotiate capabilities.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Request the available tools.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Invoke a named tool.
pub const METHOD_TOOLS_CALL: &str = "tools/call";
/// Request the available resources.
pub const METHOD_RESOURCES_LIST: &str = "resources/list";

/// Capability key for tools.
pub const CAPABILITY_TOOLS: &str = "tools";
/// Capability key for resources.
pub const CAPABILITY_RESOURCES: &str = "resources";
/// Capability key for notifications.
pub const CAPABILITY_NOTIFICATIONS: &str = "notifications";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 wire types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request object.
///
/// # Examples
///
/// ```
/// use parley::mcp::types::JsonRpcRequest;
///
/// let req = JsonRpcRequest::new("7", "tools/list", None);
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["jsonrpc"], "2.0");
/// assert_eq!(json["id"], "7");
/// assert!(json.get("params").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request correlation identifier, echoed back in the reply.
    pub id: serde_json::Value,
    /// The method name to invoke.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: &str, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: serde_json::Value::String(id.to_string()),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response object.
///
/// Fields are optional here so that malformed replies still deserialize and
/// can be rejected with a precise reason by [`crate::mcp::envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; must be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Mirrors the `id` from the corresponding request.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Successful result value; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error object; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
///
/// # Examples
///
/// ```
/// use parley::mcp::types::JsonRpcError;
///
/// let e = JsonRpcError { code: -32600, message: "Invalid Request".to_string(), data: None };
/// assert_eq!(e.to_string(), "JSON-RPC error -32600: Invalid Request");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error description.
    pub message: String,
    /// Optional additional error context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Initialize
// ---------------------------------------------------------------------------

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    /// This crate's identity, sent as `clientInfo`.
    pub fn parley() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub client_info: Implementation,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation::parley(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tools and resources
// ---------------------------------------------------------------------------

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique name of the tool within the server.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input parameters.
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Response to a `tools/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    #[serde(default)]
    pub tools: Vec<McpTool>,
}

/// A resource advertised by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl McpResource {
    /// Name used as the descriptor key; falls back to the URI.
    pub fn key(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uri)
    }
}

/// Response to a `resources/list` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResponse {
    #[serde(default)]
    pub resources: Vec<McpResource>,
}

/// Parameters for a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// One advertised capability: the server's flags plus named descriptors
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilityEntry {
    /// Options the server attached to the capability (e.g. `listChanged`)
    #[serde(default)]
    pub flags: serde_json::Map<String, serde_json::Value>,
    /// Tool or resource descriptors keyed by name
    #[serde(default)]
    pub descriptors: BTreeMap<String, serde_json::Value>,
}

/// Capability name to descriptor set
///
/// An absent key means the capability is unsupported; a present key with no
/// descriptors means supported but nothing has been listed yet.
///
/// # Examples
///
/// ```
/// use parley::mcp::types::Capabilities;
///
/// let mut caps = Capabilities::from_initialize(&serde_json::json!({
///     "capabilities": { "tools": { "listChanged": true } }
/// }));
/// assert!(caps.has("tools"));
/// assert!(!caps.has("resources"));
///
/// caps.set_descriptors("tools", vec![("echo".to_string(), serde_json::json!({}))]);
/// assert!(caps.advertises("tools", "echo"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, CapabilityEntry>);

impl Capabilities {
    /// Capabilities assumed when `initialize` fails.
    pub fn fallback() -> Self {
        let mut map = BTreeMap::new();
        for key in [
            CAPABILITY_TOOLS,
            CAPABILITY_RESOURCES,
            CAPABILITY_NOTIFICATIONS,
        ] {
            map.insert(key.to_string(), CapabilityEntry::default());
        }
        Self(map)
    }

    /// Parse the `capabilities` object of an `initialize` result.
    ///
    /// Non-object capability values are recorded as present with no flags.
    pub fn from_initialize(result: &serde_json::Value) -> Self {
        let mut map = BTreeMap::new();
        if let Some(caps) = result.get("capabilities").and_then(|c| c.as_object()) {
            for (name, value) in caps {
                let flags = value.as_object().cloned().unwrap_or_default();
                map.insert(
                    name.clone(),
                    CapabilityEntry {
                        flags,
                        descriptors: BTreeMap::new(),
                    },
                );
            }
        }
        Self(map)
    }

    /// Whether the capability key is present.
    pub fn has(&self, capability: &str) -> bool {
        self.0.contains_key(capability)
    }

    /// The capability entry, if present.
    pub fn get(&self, capability: &str) -> Option<&CapabilityEntry> {
        self.0.get(capability)
    }

    /// Whether `capability` lists a descriptor called `name`.
    pub fn advertises(&self, capability: &str, name: &str) -> bool {
        self.0
            .get(capability)
            .map_or(false, |entry| entry.descriptors.contains_key(name))
    }

    /// Replace the descriptors of a capability, adding the key if missing.
    pub fn set_descriptors<I>(&mut self, capability: &str, descriptors: I)
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let entry = self.0.entry(capability.to_string()).or_default();
        entry.descriptors = descriptors.into_iter().collect();
    }

    /// Capability names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
