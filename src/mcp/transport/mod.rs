//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every tool-server
//! transport satisfies, plus a [`TransportRegistry`] of constructors keyed by
//! the `type` string used in configuration. Concrete implementations live in
//! submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and exchanges
//!   newline-delimited JSON-RPC over its stdin/stdout pipes.
//! - [`http::HttpTransport`] -- POSTs JSON-RPC envelopes to `<base>/mcp`.
//! - `fake::FakeTransport` -- scripted in-process transport used in tests
//!   (cfg(test) only).
//!
//! # Design
//!
//! Callers issue one request at a time with [`Transport::send_request`] and
//! receive the validated `result` of the correlated reply. Framing, request
//! ids, reply validation and per-call deadlines are the responsibility of
//! each implementation.
//!
//! # Canonical Import Path
//!
//! ```no_run
//! use parley::mcp::transport::Transport;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{ParleyError, Result};
use crate::mcp::config::TransportConfig;

/// Abstraction over MCP transport implementations.
///
/// All methods are `async` so that implementations can drive I/O without
/// blocking the Tokio executor.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open the underlying channel.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::ConnectionFailed`] if the process cannot be
    /// spawned or the endpoint's health probe fails. No retry is attempted.
    async fn connect(&self) -> Result<()>;

    /// Close the underlying channel. Disconnecting twice is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Send one JSON-RPC request and return the `result` of its reply.
    ///
    /// # Arguments
    ///
    /// * `method` - JSON-RPC method name
    /// * `params` - Optional parameter object
    ///
    /// # Errors
    ///
    /// - `ConnectionFailed` when not connected or the connection is lost
    /// - `Timeout` when the per-call deadline elapses
    /// - `MalformedResponse` when the reply violates the envelope invariant
    /// - `UpstreamFailed` when the server replies with an error object
    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value>;

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Constructor key of this implementation (`stdio`, `http`, ...).
    fn kind(&self) -> &'static str;
}

/// Monotonic per-transport request id source
///
/// Ids are the decimal text of a counter starting at 1.
///
/// # Examples
///
/// ```
/// use parley::mcp::transport::RequestIds;
///
/// let ids = RequestIds::new();
/// assert_eq!(ids.next_id(), "1");
/// assert_eq!(ids.next_id(), "2");
/// ```
#[derive(Debug, Default)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        (self.0.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

/// Builds a transport from its configuration
pub type TransportConstructor =
    Arc<dyn Fn(&TransportConfig) -> Result<Box<dyn Transport>> + Send + Sync>;

/// Constructors keyed by transport type string
///
/// # Examples
///
/// ```
/// use parley::mcp::transport::TransportRegistry;
///
/// let registry = TransportRegistry::with_defaults();
/// assert_eq!(registry.kinds(), vec!["http".to_string(), "stdio".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct TransportRegistry {
    constructors: BTreeMap<String, TransportConstructor>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `stdio` and `http` constructors installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "stdio",
            Arc::new(|config: &TransportConfig| match config {
                TransportConfig::Stdio(cfg) => {
                    Ok(Box::new(stdio::StdioTransport::new(cfg.clone())) as Box<dyn Transport>)
                }
                other => Err(mismatch("stdio", other)),
            }),
        );
        registry.register(
            "http",
            Arc::new(|config: &TransportConfig| match config {
                TransportConfig::Http(cfg) => {
                    Ok(Box::new(http::HttpTransport::new(cfg)?) as Box<dyn Transport>)
                }
                other => Err(mismatch("http", other)),
            }),
        );
        registry
    }

    /// Install or replace the constructor for `kind`.
    pub fn register(&mut self, kind: &str, constructor: TransportConstructor) {
        self.constructors.insert(kind.to_string(), constructor);
    }

    /// Build a transport for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ParleyError::ValidationFailed`] for an unregistered type or
    /// a configuration the constructor rejects.
    pub fn create(&self, config: &TransportConfig) -> Result<Box<dyn Transport>> {
        let kind = config.kind();
        let constructor = self.constructors.get(kind).ok_or_else(|| {
            ParleyError::ValidationFailed(format!("unsupported transport type: {}", kind))
        })?;
        constructor(config)
    }

    /// Registered type strings in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

fn mismatch(expected: &str, got: &TransportConfig) -> anyhow::Error {
    ParleyError::ValidationFailed(format!(
        "{} constructor received {} configuration",
        expected,
        got.kind()
    ))
    .into()
}

pub mod http;
pub mod stdio;

#[cfg(test)]
pub mod fake;
