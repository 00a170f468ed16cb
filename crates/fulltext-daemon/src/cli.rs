//! CLI argument parsing for the indexing daemon.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Full-text indexing daemon
///
/// Runs documents through the staged indexing pipeline and answers
/// searches against the resulting index.
#[derive(Parser, Debug)]
#[command(name = "fulltext-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/fulltext-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override state database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override search index path
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline worker until Ctrl+C
    Run,

    /// Apply a JSONL file of document puts/removals and index until idle
    Ingest {
        /// JSONL file, one `{"op": "put" | "remove", ...}` per line
        file: PathBuf,

        /// Stop after this many passes even if work remains
        #[arg(long, default_value_t = 1000)]
        max_passes: usize,
    },

    /// Search the index
    Search {
        /// Free-text query (empty matches everything in scope)
        #[arg(default_value = "")]
        query: String,

        /// Classes to search (default: every configured class)
        #[arg(short = 'C', long = "class")]
        classes: Vec<String>,

        /// Restrict to one space
        #[arg(long)]
        space: Option<String>,

        /// Maximum hits
        #[arg(long, default_value_t = 20)]
        size: usize,

        /// Hits to skip
        #[arg(long, default_value_t = 0)]
        from: usize,
    },

    /// Show per-stage indexing progress
    Status,

    /// Print the effective configuration
    Config,
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}
