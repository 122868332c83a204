// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `procherd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procherd",
    version,
    about = "Run a diagnostic command or script with safe process-group lifecycle handling.",
    long_about = None
)]
pub struct CliArgs {
    /// Run the command through bash as a staged script instead of a
    /// direct exec.
    #[arg(long)]
    pub script: bool,

    /// Do not create a new process group; backgrounded sub-commands may
    /// outlive this invocation.
    #[arg(long)]
    pub detached: bool,

    /// Environment override, repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub envs: Vec<String>,

    /// Restart on error exits, up to this many times.
    #[arg(long, value_name = "N")]
    pub restart_limit: Option<u32>,

    /// Seconds to wait between an error exit and the restart.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub restart_interval: u64,

    /// Cancel the run after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCHERD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Command and arguments to run.
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
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
