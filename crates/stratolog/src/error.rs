//! Error types for stratolog.
//!
//! This module defines the fault taxonomy shared by the workers, the stores
//! and the supervisor. Every error can be classified with [`Error::kind`],
//! which is what the structured log events carry in their `fault` field.

use std::path::PathBuf;

use thiserror::Error;

use crate::reading::RecordError;
use crate::sensor::{SensorFault, ValidationReject};

/// The main error type for stratolog operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// A log, backup, live-state or artifact file could not be created,
    /// opened or written.
    #[error("storage fault at {path}: {source}")]
    Storage {
        /// Path of the file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A log file does not have the expected layout.
    #[error("malformed log {path}: {message}")]
    LogFormat {
        /// Path to the log file.
        path: PathBuf,
        /// Description of what is wrong.
        message: String,
    },

    /// A record could not be encoded or decoded.
    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    // === Worker Errors ===
    /// A worker could not create its required files at startup.
    #[error("worker '{worker}' failed to initialize: {reason}")]
    FatalInit {
        /// Name of the worker.
        worker: String,
        /// Why initialization failed.
        #[source]
        reason: Box<Error>,
    },

    /// The instrument failed to produce a reading this cycle.
    #[error(transparent)]
    TransientSensor(#[from] SensorFault),

    /// A reading was outside its physical envelope.
    #[error(transparent)]
    ValidationReject(#[from] ValidationReject),

    // === Supervisor Errors ===
    /// A launched unit vanished without a stop request.
    #[error("unit '{unit}' terminated unexpectedly ({status})")]
    UnexpectedExit {
        /// Name of the unit.
        unit: String,
        /// Exit status description.
        status: String,
    },

    /// A unit could not be launched.
    #[error("failed to launch unit '{unit}': {source}")]
    Launch {
        /// Name of the unit.
        unit: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The program used to launch units does not exist.
    #[error("runtime not found: {program}")]
    RuntimeMissing {
        /// The program that could not be found.
        program: String,
    },

    /// No unit could be launched at all.
    #[error("no units were launched, mission aborted")]
    NothingLaunched,

    /// A termination request could not be delivered to a unit.
    #[error("failed to signal unit '{unit}': {message}")]
    Signal {
        /// Name of the unit.
        unit: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Generic Errors ===
    /// Uncategorised I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for stratolog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

/// Coarse classification of an [`Error`], used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Instrument read failed or timed out.
    TransientSensor,
    /// Reading outside its physical envelope.
    ValidationReject,
    /// File create/open/write failure.
    Storage,
    /// Required files could not be created at startup.
    FatalInit,
    /// A unit vanished without a stop request.
    UnexpectedExit,
    /// A unit could not be launched or signalled.
    Launch,
    /// Configuration could not be loaded or is invalid.
    Config,
    /// Anything else.
    Internal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientSensor => write!(f, "transient_sensor"),
            Self::ValidationReject => write!(f, "validation_reject"),
            Self::Storage => write!(f, "storage"),
            Self::FatalInit => write!(f, "fatal_init"),
            Self::UnexpectedExit => write!(f, "unexpected_exit"),
            Self::Launch => write!(f, "launch"),
            Self::Config => write!(f, "config"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Create a storage error for the given path.
    #[must_use]
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Wrap an initialization failure for the named worker.
    #[must_use]
    pub fn fatal_init(worker: impl Into<String>, reason: Self) -> Self {
        Self::FatalInit {
            worker: worker.into(),
            reason: Box::new(reason),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Storage { .. } | Self::LogFormat { .. } | Self::Io(_) => FaultKind::Storage,
            Self::TransientSensor(_) => FaultKind::TransientSensor,
            Self::ValidationReject(_) => FaultKind::ValidationReject,
            Self::FatalInit { .. } => FaultKind::FatalInit,
            Self::UnexpectedExit { .. } => FaultKind::UnexpectedExit,
            Self::Launch { .. }
            | Self::RuntimeMissing { .. }
            | Self::NothingLaunched
            | Self::Signal { .. } => FaultKind::Launch,
            Self::ConfigLoad(_) | Self::ConfigValidation { .. } => FaultKind::Config,
            Self::Record(_) | Self::Json(_) | Self::Internal(_) => FaultKind::Internal,
        }
    }

    /// Whether this error must stop the process that hit it.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), FaultKind::FatalInit | FaultKind::Config)
            || matches!(self, Self::RuntimeMissing { .. } | Self::NothingLaunched)
    }
}
