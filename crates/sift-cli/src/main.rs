//! # Sift CLI
//!
//! Command-line interface for the Sift indexing engine.
//!
//! ## Commands
//!
//! - `sift index` - Scan the workspace and bring every index up to date
//! - `sift query <needle>` - Substring search over indexed content
//! - `sift status` - Show per-index state
//! - `sift watch` - Monitor the workspace and keep indices fresh
//! - `sift clear` - Delete all index data
//!
//! ## Example Usage
//!
//! ```bash
//! # Build the index for the current directory
//! sift index
//!
//! # Find files containing a string, restricted to Rust sources
//! sift query "ensure_up_to_date" --ext rs
//!
//! # Keep the index fresh while editing
//! sift watch
//! ```

mod app;
mod commands;
mod corpus;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sift - incremental inverted indices over a file corpus
#[derive(Parser)]
#[command(name = "sift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory (defaults to the current directory)
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the workspace and bring every index up to date
    Index {
        /// Wipe and rebuild every index from scratch
        #[arg(short, long)]
        force: bool,
    },

    /// Substring search over indexed content
    Query {
        /// The string to search for (case-insensitive)
        needle: String,

        /// Filter by extension (can be used multiple times)
        #[arg(short, long)]
        ext: Vec<String>,

        /// Maximum number of results to show
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Re-scan the workspace before querying
        #[arg(short, long)]
        sync: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Show per-index state
    Status,

    /// Monitor the workspace and keep indices fresh
    Watch,

    /// Delete all index data
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => sift_core::Config::load_from(path)?,
        None => sift_core::Config::load()?,
    };

    // Execute command
    match cli.command {
        Commands::Index { force } => commands::index::run(config, &cli.workspace, force),
        Commands::Query {
            needle,
            ext,
            limit,
            sync,
            output,
        } => commands::query::run(config, &cli.workspace, &needle, ext, limit, sync, output),
        Commands::Status => commands::status::run(config, &cli.workspace),
        Commands::Watch => commands::watch::run(config, &cli.workspace),
        Commands::Clear { yes } => commands::clear::run(config, &cli.workspace, yes),
    }
}
