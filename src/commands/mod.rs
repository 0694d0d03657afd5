//! Command handlers for the Parley CLI
//!
//! Each submodule drives one subcommand against a freshly built [`Engine`].

use std::str::FromStr;

use colored::Colorize;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ParleyError, Result};
use crate::routing::{Reply, ReplyStatus};
use crate::session::{Blob, RequestKind};

pub mod status;

/// Parse a request kind given on the command line.
fn parse_kind(kind: &str) -> Result<RequestKind> {
    RequestKind::from_str(kind).map_err(|e| ParleyError::ValidationFailed(e).into())
}

/// Print a reply with its status colored.
fn print_reply(reply: &Reply) {
    let tag = match reply.status {
        ReplyStatus::Success => "ok".green(),
        ReplyStatus::Partial => "partial".yellow(),
        ReplyStatus::Error => "error".red(),
    };
    let strategy = reply.strategy().unwrap_or("-");
    println!("[{} {}] {}", tag, strategy.dimmed(), reply.text);
    if let Some(error) = &reply.error {
        eprintln!("{}", format!("  cause: {}", error).red());
    }
}

pub mod run {
    //! Interactive session mode.
    //!
    //! Opens one session and feeds every line typed at the prompt through
    //! [`Engine::process_message`]. Lines starting with `/` are commands.

    use super::*;
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    /// Slash commands understood by the prompt
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SlashCommand {
        Stats,
        Health,
        Provider(String),
        Server(String),
        Help,
        Exit,
        Unknown(String),
    }

    /// Parse a `/`-prefixed line. Returns `None` for ordinary messages.
    pub fn parse_slash_command(line: &str) -> Option<SlashCommand> {
        let rest = line.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::to_string);
        let command = match (name, arg) {
            ("stats", _) => SlashCommand::Stats,
            ("health", _) => SlashCommand::Health,
            ("provider", Some(p)) => SlashCommand::Provider(p),
            ("server", Some(s)) => SlashCommand::Server(s),
            ("help", _) => SlashCommand::Help,
            ("exit" | "quit", _) => SlashCommand::Exit,
            _ => SlashCommand::Unknown(line.to_string()),
        };
        Some(command)
    }

    fn print_help() {
        println!("{}", "Commands:".bold());
        println!("  /stats            session, provider and server statistics");
        println!("  /health           component health");
        println!("  /provider <name>  answer with a specific provider");
        println!("  /server <name>    send tool calls to a specific server");
        println!("  /exit             close the session and quit");
    }

    /// Run the interactive loop for `user_id`
    pub async fn run_session(config: Config, user_id: String) -> Result<()> {
        tracing::info!(user_id = %user_id, "Starting interactive session");

        let engine = Engine::new(config)?;
        engine.start().await?;

        let session = engine.create_session(&user_id, Blob::new()).await;
        println!(
            "Session {} opened for {}. Type /help for commands.",
            session.session_id.cyan(),
            user_id
        );

        let mut rl = DefaultEditor::new()?;
        let outcome = loop {
            match rl.readline("parley> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    match parse_slash_command(trimmed) {
                        Some(SlashCommand::Exit) => break Ok(()),
                        Some(SlashCommand::Help) => print_help(),
                        Some(SlashCommand::Stats) => status::print_stats(&engine).await,
                        Some(SlashCommand::Health) => status::print_health(&engine).await,
                        Some(SlashCommand::Provider(name)) => {
                            match engine.select_provider(&session.session_id, &name).await {
                                Ok(_) => println!("Using provider {}", name.cyan()),
                                Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
                            }
                        }
                        Some(SlashCommand::Server(name)) => {
                            match engine.attach_server(&session.session_id, &name).await {
                                Ok(_) => println!("Using server {}", name.cyan()),
                                Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
                            }
                        }
                        Some(SlashCommand::Unknown(cmd)) => {
                            println!("{}", format!("Unknown command: {}", cmd).yellow());
                        }
                        None => {
                            let result = engine
                                .process_message(
                                    &user_id,
                                    trimmed,
                                    Some(&session.session_id),
                                    RequestKind::Chat,
                                    Blob::new(),
                                )
                                .await;
                            match result {
                                Ok(reply) => print_reply(&reply),
                                Err(e) => break Err(e),
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };

        engine.close_session(&session.session_id).await;
        engine.stop().await;
        outcome
    }

}

pub mod ask {
    //! One-shot message processing.

    use super::*;

    /// Process `text` in a new session and print the reply
    pub async fn ask(
        config: Config,
        user_id: String,
        text: String,
        kind: String,
        json: bool,
    ) -> Result<()> {
        let kind = parse_kind(&kind)?;
        let engine = Engine::new(config)?;
        engine.start().await?;

        let result = engine
            .process_message(&user_id, &text, None, kind, Blob::new())
            .await;
        engine.stop().await;
        let reply = result?;

        if json {
            println!("{}", serde_json::to_string_pretty(&reply)?);
        } else {
            print_reply(&reply);
        }
        Ok(())
    }
}

pub mod check {
    //! Connectivity check.

    use super::*;

    /// Start the engine, report health, then shut down
    pub async fn check(config: Config, table: bool) -> Result<()> {
        let engine = Engine::new(config)?;
        engine.start().await?;

        if table {
            status::print_health(&engine).await;
            status::print_stats(&engine).await;
        } else {
            let report = engine.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        engine.stop().await;
        Ok(())
    }
}

pub mod show_config {
    //! Effective configuration dump.

    use super::*;

    /// Print the loaded configuration as YAML. API keys are masked.
    pub fn show_config(config: &Config) -> Result<()> {
        let mut config = config.clone();
        for settings in config.providers.providers.values_mut() {
            if settings.api_key.is_some() {
                settings.api_key = Some("***".to_string());
            }
        }
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("mcp_request").unwrap(), RequestKind::McpRequest);
        assert!(parse_kind("shout").is_err());
    }
}
