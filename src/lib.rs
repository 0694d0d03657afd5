//! Parley - orchestration layer between language models and MCP tool servers
//!
//! A caller submits a message for a user session. Parley classifies it,
//! calls MCP tools, a language model, or both, and returns one reply.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `engine`: Top-level facade tying sessions, routing and registries together
//! - `session`: Session records, expiry and per-user limits
//! - `routing`: Context building, strategy classification and dispatch
//! - `mcp`: MCP envelopes, transports, server handles and the server registry
//! - `providers`: Language-model clients and the provider registry
//! - `events`: Lifecycle event bus
//! - `config`: Configuration loading and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use parley::session::{Blob, RequestKind};
//! use parley::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/parley.yaml")?;
//!     let engine = Engine::new(config)?;
//!     engine.start().await?;
//!
//!     let reply = engine
//!         .process_message("alice", "list files in src", None, RequestKind::Chat, Blob::new())
//!         .await?;
//!     println!("{}", reply.text);
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod mcp;
pub mod metrics;
pub mod providers;
pub mod routing;
pub mod session;
pub mod stats;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, HealthReport};
pub use error::{ParleyError, Result};
pub use routing::{Reply, ReplyStatus};

#[cfg(test)]
pub mod test_utils;
