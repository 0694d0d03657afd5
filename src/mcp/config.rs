//! MCP tool server configuration types
//!
//! Each entry under `servers.servers` in the YAML configuration describes one
//! tool server: the handle type that wraps it and the transport used to
//! reach it. Entries are validated eagerly by [`ServerConfig::validate`]
//! when they are added to the registry.
//!
//! ```yaml
//! servers:
//!   health_check_interval_secs: 60
//!   servers:
//!     filesystem:
//!       type: generic
//!       transport:
//!         type: stdio
//!         command: python
//!         args: ["-m", "fs_server"]
//!     search:
//!       transport:
//!         type: http
//!         base_url: http://localhost:8080
//!         api_key: secret
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Tool server section of the configuration
///
/// Defaults to an empty set of servers so that YAML files omitting the
/// `servers:` key still deserialize.
///
/// # Examples
///
/// ```
/// use parley::mcp::config::McpConfig;
///
/// let cfg = McpConfig::default();
/// assert!(cfg.servers.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Seconds between health-check passes over every server
    #[serde(default = "default_server_health_interval")]
    pub health_check_interval_secs: u64,

    /// Servers by name, started in name order
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

fn default_server_health_interval() -> u64 {
    60
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_server_health_interval(),
            servers: BTreeMap::new(),
        }
    }
}

/// One tool server entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Handle constructor key (`generic` unless a custom one is registered)
    #[serde(rename = "type", default = "default_server_type")]
    pub server_type: String,

    /// How to reach the server
    pub transport: TransportConfig,

    /// Optional human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_server_type() -> String {
    "generic".to_string()
}

impl ServerConfig {
    /// Build an entry with the default handle type.
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            server_type: default_server_type(),
            transport,
            description: None,
        }
    }

    /// Reject entries that can never connect.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::ValidationFailed`] naming the offending field.
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ParleyError::ValidationFailed("server name is required".into()).into());
        }
        if self.server_type.trim().is_empty() {
            return Err(ParleyError::ValidationFailed(format!(
                "server `{}`: type is required",
                name
            ))
            .into());
        }
        self.transport.validate(name)
    }
}

/// Transport selection, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Child process speaking line-delimited JSON-RPC on stdin/stdout
    Stdio(StdioTransportConfig),
    /// JSON-RPC over HTTP POST
    Http(HttpTransportConfig),
}

impl TransportConfig {
    /// Constructor key used by the transport registry.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::Http(_) => "http",
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self {
            TransportConfig::Stdio(cfg) => {
                if cfg.command.trim().is_empty() {
                    return Err(ParleyError::ValidationFailed(format!(
                        "server `{}`: stdio transport requires a command",
                        name
                    ))
                    .into());
                }
                if cfg.request_timeout_secs == 0 {
                    return Err(ParleyError::ValidationFailed(format!(
                        "server `{}`: request_timeout_secs must be greater than 0",
                        name
                    ))
                    .into());
                }
                Ok(())
            }
            TransportConfig::Http(cfg) => {
                if cfg.base_url.trim().is_empty() {
                    return Err(ParleyError::ValidationFailed(format!(
                        "server `{}`: http transport requires a base_url",
                        name
                    ))
                    .into());
                }
                let parsed = url::Url::parse(&cfg.base_url).map_err(|e| {
                    ParleyError::ValidationFailed(format!(
                        "server `{}`: invalid base_url `{}`: {}",
                        name, cfg.base_url, e
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ParleyError::ValidationFailed(format!(
                        "server `{}`: base_url must use http or https",
                        name
                    ))
                    .into());
                }
                Ok(())
            }
        }
    }
}

/// Settings for a child-process transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StdioTransportConfig {
    /// Executable to launch
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// When set, the child's environment is exactly this map; otherwise it
    /// inherits the parent's environment.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Deadline for a single request/reply exchange
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Time allowed between SIGTERM and a forced kill on disconnect
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    5
}

impl StdioTransportConfig {
    /// Minimal configuration launching `command` with default deadlines.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: None,
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Settings for an HTTP transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTransportConfig {
    /// Base URL; the health probe and RPC endpoint are resolved against it
    pub base_url: String,

    /// Sent as `Authorization: Bearer <api_key>` when present
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: default_http_timeout(),
        }
    }
}
