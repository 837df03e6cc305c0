//! Command-line interface for stratolog.
//!
//! This module provides the CLI structure for the `stratolog` binary. The
//! same binary is the supervisor (`run`) and every worker it launches
//! (`worker <source>`).

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, LatestCommand, SourceArg, SummarizeCommand, WorkerCommand};

use crate::logging::Verbosity;

/// stratolog - Crash-safe telemetry logging for balloon payloads
///
/// Launches one sampling worker per instrument, appends every valid reading
/// to a per-source log and merges the latest values into a shared live-state
/// file.
#[derive(Debug, Parser)]
#[command(name = "stratolog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Flight mode: suppress all output except fatal errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch all workers and supervise them until interrupted
    Run,

    /// Run the sampling loop for one source
    Worker(WorkerCommand),

    /// Summarize the tail of a source log
    Summarize(SummarizeCommand),

    /// Show the latest value of every field
    Latest(LatestCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
