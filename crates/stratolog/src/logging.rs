//! Logging configuration for stratolog.
//!
//! This module provides initialization and configuration for the tracing-based
//! logging system used throughout stratolog. Events go to stderr so that
//! command output on stdout stays machine-readable.
//!
//! [`Verbosity::Quiet`] is the flight mode: only fatal faults are logged at
//! ERROR, so everything else is swallowed.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except fatal errors.
    Quiet,
    /// Normal output level (info and above).
    #[default]
    Normal,
    /// Verbose output (debug and above), every fault is reported.
    Verbose,
    /// Very verbose output (trace level).
    Trace,
}

impl Verbosity {
    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// The command-line flag that selects this verbosity, if any.
    ///
    /// Used by the supervisor to launch workers in the same mode.
    #[must_use]
    pub fn as_flag(&self) -> Option<&'static str> {
        match self {
            Self::Quiet => Some("-q"),
            Self::Normal => None,
            Self::Verbose => Some("-v"),
            Self::Trace => Some("-vv"),
        }
    }
}

/// Initialize the logging system.
///
/// This should be called once at process startup. The logging level can be
/// controlled via:
/// 1. The `verbosity` parameter
/// 2. The `RUST_LOG` environment variable (takes precedence)
///
/// # Examples
///
/// ```no_run
/// use stratolog::{init_logging, logging::Verbosity};
///
/// // Flight mode
/// init_logging(Verbosity::Quiet);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let default_filter = format!("stratolog={}", verbosity.to_level_filter());

    // RUST_LOG wins
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        );

    // Ignore the error if a subscriber is already set.
    let _ = subscriber.try_init();
}

/// Initialize logging for tests.
///
/// Only warnings and errors are shown to keep test output clean.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
