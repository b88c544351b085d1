//! CLI Adapter
//!
//! Command-line interface for nft-scout.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    build_aggregator, execute, render_text, BatchCmd, CliApp, Command, FetchCmd, OutputFormat,
    DEFAULT_CONFIG_PATH,
};
