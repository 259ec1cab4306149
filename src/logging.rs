// src/logging.rs

//! Logging setup for `aslrun` using `tracing` + `tracing-subscriber`.
//!
//! The filter is chosen as follows:
//! 1. `--log-level` CLI flag: that level for `aslrun`
//! 2. `ASLRUN_LOG`: either a bare level ("debug") or full `EnvFilter`
//!    directives ("aslrun::watch=trace,aslrun=info")
//! 3. `info`
//!
//! File-watching crates are capped at `warn` unless a directive names them.
//! Logs go to stderr; stdout carries the progress feed and the run summary.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "ASLRUN_LOG";

const QUIET_DEPENDENCIES: [&str; 2] = ["notify", "mio"];

/// Initialise the global subscriber. Call once, from `main`.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let directives = filter_directives(cli_level, env.as_deref());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("invalid log filter {directives:?}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// `EnvFilter` directives for a CLI level and the raw `ASLRUN_LOG` value.
pub fn filter_directives(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    let base = match (cli_level, env.map(str::trim).filter(|s| !s.is_empty())) {
        (Some(level), _) => level_name(level).to_string(),
        (None, Some(raw)) => match parse_level_str(raw) {
            Some(level) => level.as_str().to_lowercase(),
            None => raw.to_string(),
        },
        (None, None) => "info".to_string(),
    };

    let mut directives = base;
    for dep in QUIET_DEPENDENCIES {
        if !directives.split(',').any(|d| d.trim().starts_with(dep)) {
            directives.push_str(&format!(",{dep}=warn"));
        }
    }
    directives
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

pub fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
