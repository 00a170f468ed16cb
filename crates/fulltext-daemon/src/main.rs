//! Fulltext Daemon
//!
//! Staged full-text indexing over a RocksDB state store and a Tantivy index.
//!
//! # Usage
//!
//! ```bash
//! fulltext-daemon run
//! fulltext-daemon ingest docs.jsonl [--max-passes N]
//! fulltext-daemon search "login bug" [-C task] [--space SPACE]
//! fulltext-daemon status
//! fulltext-daemon config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/fulltext-indexer/config.toml)
//! 3. Environment variables (FULLTEXT_*)
//! 4. CLI flags

use anyhow::Result;

use fulltext_daemon::{
    ingest_file, init_logging, load_settings, parse_args, run_daemon, search, show_config,
    show_status, Commands,
};
use fulltext_types::SearchQuery;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.index_path.as_deref(),
        cli.log_level.as_deref(),
    )?;

    // Config output goes to stdout untouched
    if matches!(cli.command, Commands::Config) {
        return show_config(&settings);
    }
    init_logging(&settings)?;

    match cli.command {
        Commands::Run => {
            run_daemon(&settings).await?;
        }
        Commands::Ingest { file, max_passes } => {
            ingest_file(&settings, &file, max_passes).await?;
        }
        Commands::Search {
            query,
            classes,
            space,
            size,
            from,
        } => {
            let mut query = SearchQuery::text(query);
            query.space = space;
            search(&settings, query, classes, size, from).await?;
        }
        Commands::Status => {
            show_status(&settings).await?;
        }
        Commands::Config => {}
    }

    Ok(())
}
