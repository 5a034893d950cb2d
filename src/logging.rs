// src/logging.rs

//! Diagnostics for `svcgraph`, through `tracing` + `tracing-subscriber`.
//!
//! The filter comes from `--log-level` when given. Otherwise `SVCGRAPH_LOG`
//! is read, either as a bare level (`debug`) or as full filter directives
//! (`svcgraph::exec=debug,warn`). Without either, only warnings are shown.
//!
//! Diagnostics go to STDERR. STDOUT is reserved for the per-action progress
//! lines and the closing summary.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

/// Environment variable consulted when `--log-level` is absent.
pub const LOG_ENV: &str = "SVCGRAPH_LOG";

const DEFAULT_LEVEL: Level = Level::WARN;

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(level_from_log_level(lvl).as_str()),
        None => filter_from_env(std::env::var(LOG_ENV).ok().as_deref()),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing the log subscriber: {e}"))?;

    Ok(())
}

fn filter_from_env(value: Option<&str>) -> EnvFilter {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return EnvFilter::new(DEFAULT_LEVEL.as_str());
    };

    if let Some(level) = parse_level_str(value) {
        return EnvFilter::new(level.as_str());
    }

    EnvFilter::try_new(value).unwrap_or_else(|err| {
        eprintln!("svcgraph: ignoring {LOG_ENV}={value:?}: {err}");
        EnvFilter::new(DEFAULT_LEVEL.as_str())
    })
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

/// Bare level names, case-insensitive; `warning` is accepted for `warn`.
pub fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
