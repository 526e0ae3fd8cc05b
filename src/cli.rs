// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! NOTE: this expects `clap` to be built with the `derive` feature, e.g.:
//! `clap = { version = "4.5.53", features = ["derive"] }` in `Cargo.toml`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `taskfarm`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskfarm",
    version,
    about = "Run campaigns of independent tasks over configured execution backends.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Taskfarm.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Taskfarm.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKFARM_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create a new session directory.
    Init {
        /// Session directory to create.
        #[arg(value_name = "DIR")]
        session: PathBuf,

        /// Maximum resubmission attempts per failed task.
        #[arg(long, value_name = "N", default_value_t = 0)]
        max_retries: u32,
    },

    /// Add a task to an existing session.
    Add {
        /// Session directory.
        #[arg(value_name = "DIR")]
        session: PathBuf,

        /// Task name, unique within the session.
        #[arg(long, value_name = "NAME")]
        name: String,

        /// Directory result artifacts are copied into.
        #[arg(long, value_name = "PATH")]
        output_dir: PathBuf,

        /// Cores required by the task.
        #[arg(long, value_name = "N", default_value_t = 1)]
        cores: u32,

        /// Required runtime tag; only adapters carrying it qualify.
        #[arg(long, value_name = "TAG")]
        runtime_tag: Option<String>,

        /// The command to execute (program plus arguments).
        #[arg(value_name = "CMD", required = true, last = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Run the engine until every task in the session is terminated.
    Run {
        /// Session directory.
        #[arg(value_name = "DIR")]
        session: PathBuf,

        /// Run at most this many cycles instead of running to completion.
        #[arg(long, value_name = "N")]
        cycles: Option<u32>,
    },

    /// Print a progress summary for a session.
    Status {
        /// Session directory.
        #[arg(value_name = "DIR")]
        session: PathBuf,
    },

    /// Cancel all remote jobs and close the session.
    Abort {
        /// Session directory.
        #[arg(value_name = "DIR")]
        session: PathBuf,
    },
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
