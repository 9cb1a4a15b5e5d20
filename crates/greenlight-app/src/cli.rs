//! CLI argument definitions for the Greenlight binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use greenlight_core::config::{expand_home, ReplacementStyle};

/// Greenlight: de-identify clinical notes and match them to payer policies.
#[derive(Parser, Debug)]
#[command(name = "greenlight", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the embedding cache.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Remove PHI from a clinical note read from a file or stdin.
    Deidentify {
        /// Read the note from this file instead of stdin.
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,

        /// Print the full result with its validation report as JSON.
        #[arg(long = "json")]
        json: bool,

        /// Override the configured replacement style.
        #[arg(long = "style", value_enum)]
        style: Option<StyleArg>,
    },

    /// Embed one text per input line and print the vectors as JSON lines.
    Embed {
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,

        /// Texts per model call. Defaults to the configured batch size.
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
    },

    /// Index policy chunks and find the ones closest to a note.
    Search {
        /// JSON-lines file of policy chunks: {"id", "text", "specialty"}.
        #[arg(short = 'p', long = "policies")]
        policies: PathBuf,

        /// Note text. Reads --file or stdin when omitted.
        #[arg(short = 'q', long = "query", conflicts_with = "file")]
        query: Option<String>,

        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,

        /// Maximum number of matches.
        #[arg(short = 'k', long = "limit")]
        limit: Option<usize>,

        /// Minimum cosine similarity.
        #[arg(long = "min-score")]
        min_score: Option<f32>,

        /// Only match policies for this specialty.
        #[arg(short = 's', long = "specialty")]
        specialty: Option<String>,
    },

    /// Inspect the loaded embedding model.
    Info,

    /// Embedding cache administration.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Entry count and size for the configured model.
    Stats,
    /// Remove every cached embedding for the configured model.
    Clear,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long = "force")]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleArg {
    Token,
    Synthetic,
}

impl From<StyleArg> for ReplacementStyle {
    fn from(arg: StyleArg) -> Self {
        match arg {
            StyleArg::Token => ReplacementStyle::Token,
            StyleArg::Synthetic => ReplacementStyle::Synthetic,
        }
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > GREENLIGHT_CONFIG env var > ~/.greenlight/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("GREENLIGHT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Returns `None` if not overridden on the command line.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn default_config_path() -> PathBuf {
    expand_home("~/.greenlight/config.toml")
}
