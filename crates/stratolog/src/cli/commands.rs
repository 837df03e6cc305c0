//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::reading::SourceKind;

/// Data source argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// DHT11 temperature and humidity
    HumidityTemperature,
    /// MPU-6050 acceleration and rotation
    Motion,
    /// KY-038 sound detector and buzzer
    Acoustic,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::HumidityTemperature => Self::HumidityTemperature,
            SourceArg::Motion => Self::Motion,
            SourceArg::Acoustic => Self::Acoustic,
        }
    }
}

/// Worker command arguments.
#[derive(Debug, Args)]
pub struct WorkerCommand {
    /// The source to sample
    #[arg(value_enum)]
    pub source: SourceArg,
}

/// Summarize command arguments.
#[derive(Debug, Args)]
pub struct SummarizeCommand {
    /// The source whose log to summarize
    #[arg(value_enum)]
    pub source: SourceArg,

    /// Records kept from the end of the log
    #[arg(long, value_name = "N")]
    pub max_points: Option<usize>,

    /// Moving-average window
    #[arg(short, long, value_name = "W")]
    pub window: Option<usize>,

    /// Where to publish the summary artifact
    #[arg(short, long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Latest command arguments.
#[derive(Debug, Args)]
pub struct LatestCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Read the newest record of each log instead of the live-state file
    #[arg(long)]
    pub from_log: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
