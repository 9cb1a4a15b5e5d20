//! Greenlight application binary - composition root.
//!
//! 1. Parse CLI arguments
//! 2. Load configuration from TOML and apply command-line overrides
//! 3. Initialize tracing on stderr so stdout carries only results
//! 4. Build the engines a subcommand needs and run it

mod cli;
mod commands;

use clap::Parser;
use greenlight_core::config::GreenlightConfig;
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing exists; its outcome is logged below.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(GreenlightConfig::load(&config_file))
    } else {
        None
    };

    let log_level = args.resolve_log_level().unwrap_or_else(|| match &loaded {
        Some(Ok(config)) => config.general.log_level.clone(),
        _ => "info".to_string(),
    });
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match loaded {
        Some(Ok(config)) => {
            tracing::debug!(path = %config_file.display(), "Configuration loaded");
            config
        }
        Some(Err(e)) => {
            tracing::warn!(
                path = %config_file.display(),
                error = %e,
                "Failed to load config, using defaults"
            );
            GreenlightConfig::default()
        }
        None => {
            tracing::debug!(path = %config_file.display(), "No config file, using defaults");
            GreenlightConfig::default()
        }
    };
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    config.general.log_level = log_level;

    let outcome = match args.command {
        Command::Deidentify { file, json, style } => {
            commands::deidentify(config, file, json, style).await
        }
        Command::Embed { file, batch_size } => commands::embed(config, file, batch_size).await,
        Command::Search {
            policies,
            query,
            file,
            limit,
            min_score,
            specialty,
        } => commands::search(config, policies, query, file, limit, min_score, specialty).await,
        Command::Info => commands::info(config).await,
        Command::Cache { action } => commands::cache(config, action),
        Command::Config { action } => commands::config(config, &config_file, action),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "Command failed");
        return Err(e.into());
    }
    Ok(())
}
