// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `aslrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "aslrun",
    version,
    about = "Run ExploreASL batches across studies and cores, tracking progress via STATUS files.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the run plan (TOML).
    ///
    /// Default: `Aslrun.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Aslrun.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ASLRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the plan and every study, print the planned workload, but
    /// don't create lock directories or start any process.
    #[arg(long)]
    pub dry_run: bool,
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
