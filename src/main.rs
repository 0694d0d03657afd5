//! Parley - LLM and MCP orchestration CLI
//!
#![doc = "Main entry point for the Parley command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parley::cli::{Cli, Commands};
use parley::commands;
use parley::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/parley.yaml");
    let config = Config::load(config_path)?;

    init_tracing(&config, cli.verbose, cli.json_logs);
    parley::metrics::init_metrics_exporter();

    config.validate()?;

    match cli.command {
        Commands::Run { user } => {
            commands::run::run_session(config, user).await?;
        }
        Commands::Ask {
            text,
            user,
            kind,
            json,
        } => {
            tracing::debug!(user_id = %user, kind = %kind, "Processing single message");
            commands::ask::ask(config, user, text, kind, json).await?;
        }
        Commands::Check { table } => {
            tracing::info!("Checking provider and server connectivity");
            commands::check::check(config, table).await?;
        }
        Commands::Config => {
            commands::show_config::show_config(&config)?;
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(config: &Config, verbose: bool, json_logs: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={}", level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs || config.logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
