//! Command-line interface definition for Parley
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// Parley - route conversations between language models and MCP tool servers
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/parley.yaml")]
    pub config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Parley
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive session reading messages from stdin
    Run {
        /// User id owning the session
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Process a single message and print the reply
    Ask {
        /// Message text
        text: String,

        /// User id owning the session
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Request kind: chat, mcp_request or system
        #[arg(short, long, default_value = "chat")]
        kind: String,

        /// Print the full reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect every provider and server and print their health
    Check {
        /// Print a table instead of JSON
        #[arg(long)]
        table: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
