// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `svcgraph`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "svcgraph",
    version,
    about = "Run service actions across nodes, in dependency order.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `SVCGRAPH_CONFIG`, else `Svcgraph.toml` in the current
    /// working directory.
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SVCGRAPH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print what would run, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the dependency graph in DOT format and exit.
    #[arg(long)]
    pub graph: bool,

    /// Only run on these nodes (node set, e.g. `node[1-4]`).
    #[arg(long, short = 'n', value_name = "NODES")]
    pub nodes: Option<String>,

    /// Never run on these nodes.
    #[arg(long = "exclude-nodes", short = 'X', value_name = "NODES")]
    pub exclude_nodes: Option<String>,

    /// Lock a top-level service out of the run. Repeatable.
    #[arg(long = "exclude", short = 'x', value_name = "SERVICE")]
    pub exclude_services: Vec<String>,

    /// Define or override a variable. Repeatable.
    #[arg(long = "define", short = 'd', value_name = "KEY=VALUE", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Default fanout for this run.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub fanout: Option<usize>,

    /// Action to run (e.g. `start`, `stop`, `status`).
    #[arg(value_name = "ACTION", required_unless_present = "graph")]
    pub action: Option<String>,

    /// Services to run the action on. Default: every top-level service.
    #[arg(value_name = "SERVICE")]
    pub services: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_define(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
