//! MCP (Model Context Protocol) tool server support
//!
//! This module connects Parley to external MCP tool servers and dispatches
//! tool calls across them.
//!
//! # Module Layout
//!
//! - `types`     -- JSON-RPC primitives, MCP method constants, typed capabilities
//! - `envelope`  -- reply validation against the JSON-RPC envelope invariant
//! - `transport` -- `Transport` trait, constructor registry, stdio and HTTP
//!   implementations
//! - `config`    -- server and transport configuration structures
//! - `server`    -- `ToolServerHandle` trait and the generic `McpServer`
//! - `registry`  -- `ServerRegistry` with health checks and tool fallback

pub mod config;
pub mod envelope;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;

pub use registry::{RegistryStats, ServerRegistry, ToolCallResult};
pub use server::{McpServer, ServerFactory, ServerStats, ToolServerHandle};
