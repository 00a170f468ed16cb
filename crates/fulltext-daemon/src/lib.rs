//! Fulltext daemon library exports.
//!
//! This crate provides the CLI binary for the full-text indexing pipeline.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, ingest, search, status, config)
//! - `ingest`: JSONL ingest format

pub mod cli;
pub mod commands;
pub mod ingest;

pub use cli::{parse_args, Cli, Commands};
pub use commands::{
    ingest_file, init_logging, load_settings, run_daemon, search, show_config, show_status,
    Runtime,
};
pub use ingest::{parse_ingest, IngestOp};
