//! `stratolog` - Crash-safe telemetry logging for high-altitude balloon payloads
//!
//! This library provides the sampling workers, the append-only per-source
//! logs, the shared live-state document, the process supervisor and the
//! windowed summarizer that feeds the ground dashboard.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod reading;
pub mod sensor;
pub mod shutdown;
pub mod storage;
pub mod summary;
pub mod supervisor;
pub mod worker;

pub use config::Config;
pub use error::{Error, FaultKind, Result};
pub use logging::init_logging;
pub use reading::{Reading, SourceKind};
pub use storage::{AppendLog, LiveState, LiveStateStore};
pub use summary::{summarize, Summary, SummaryOptions};
pub use supervisor::{ProcessSupervisor, UnitSpec};
pub use worker::{SensorWorker, WorkerState};
