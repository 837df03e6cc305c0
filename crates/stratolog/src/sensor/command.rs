//! Instrument bridge through an external helper program.
//!
//! Vendor drivers for single-wire and I2C parts are often only available as
//! scripts. The helper is run once per acquisition and must print a single
//! comma-separated line of field values in schema order. An empty line, or
//! the word `null`, means the instrument had no reading this cycle.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::{Acquisition, Sensor, SensorFault};
use crate::reading::SourceKind;
use crate::storage::schema::SEPARATOR;

/// A sensor read by running a helper program.
#[derive(Debug, Clone)]
pub struct CommandSensor {
    kind: SourceKind,
    argv: Vec<String>,
    read_timeout: Duration,
    retries: u32,
}

impl CommandSensor {
    /// Create a sensor that runs `argv` for each acquisition.
    ///
    /// A faulted read is retried up to `retries` more times within the same
    /// acquisition, each attempt bounded by `read_timeout`.
    #[must_use]
    pub fn new(kind: SourceKind, argv: Vec<String>, read_timeout: Duration, retries: u32) -> Self {
        Self {
            kind,
            argv,
            read_timeout,
            retries,
        }
    }

    async fn read_once(&self) -> Result<Acquisition, SensorFault> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| SensorFault::Bus("no helper command configured".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SensorFault::Bus(format!("failed to run {program}: {e}")))?;

        let output = timeout(self.read_timeout, child.wait_with_output())
            .await
            .map_err(|_| SensorFault::Timeout {
                after: self.read_timeout,
            })?
            .map_err(|e| SensorFault::Bus(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SensorFault::Bus(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(self.kind, &stdout)
    }
}

/// Parse one line of helper output into field values.
pub(crate) fn parse_output(kind: SourceKind, stdout: &str) -> Result<Acquisition, SensorFault> {
    let line = stdout.lines().next().unwrap_or("").trim();
    if line.is_empty() || line.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let expected = kind.schema().fields.len();
    let values = line
        .split(SEPARATOR)
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .map_err(|_| SensorFault::Malformed(format!("'{}' is not a number", raw.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() != expected {
        return Err(SensorFault::Malformed(format!(
            "expected {expected} values, got {}",
            values.len()
        )));
    }
    Ok(Some(values))
}

#[async_trait::async_trait]
impl Sensor for CommandSensor {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn acquire(&mut self) -> Result<Acquisition, SensorFault> {
        let mut attempt = 0;
        loop {
            match self.read_once().await {
                Ok(acquisition) => {
                    trace!(source = %self.kind, attempt, "helper read ok");
                    return Ok(acquisition);
                }
                Err(fault) if attempt < self.retries => {
                    debug!(source = %self.kind, attempt, %fault, "helper read failed, retrying");
                    attempt += 1;
                }
                Err(fault) => return Err(fault),
            }
        }
    }
}
