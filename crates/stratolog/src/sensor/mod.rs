//! Instrument abstraction.
//!
//! A worker is written once and parameterized by a [`Sensor`]: something
//! that can acquire raw values for one [`SourceKind`] and validate the
//! resulting values against the physical envelope of their fields.

pub mod command;
pub mod simulated;

use std::time::Duration;

use thiserror::Error;

use crate::config::{Backend, SensorConfig};
use crate::reading::SourceKind;
use crate::storage::schema::{Envelope, FieldSpec};

pub use command::CommandSensor;
pub use simulated::SimulatedSensor;

/// Transient failures while talking to an instrument.
///
/// These are retried on the next cycle and never stop a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorFault {
    /// The instrument did not answer in time.
    #[error("sensor read timed out after {after:?}")]
    Timeout {
        /// How long we waited.
        after: Duration,
    },

    /// The bus or driver reported an error.
    #[error("sensor bus error: {0}")]
    Bus(String),

    /// The instrument answered with something we could not interpret.
    #[error("malformed sensor output: {0}")]
    Malformed(String),
}

/// A reading outside the physical envelope of one of its fields.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field} = {value} outside [{}, {}]", .envelope.min, .envelope.max)]
pub struct ValidationReject {
    /// The offending field.
    pub field: &'static str,
    /// The offending value.
    pub value: f64,
    /// The envelope it violated.
    pub envelope: Envelope,
}

/// What one acquisition produced.
///
/// `None` means the instrument had nothing this cycle (the "null reading").
pub type Acquisition = Option<Vec<f64>>;

/// A source of readings for one instrument.
///
/// Implementors provide the acquisition mechanism; the default
/// [`Sensor::validate`] applies the envelopes declared by the source schema.
#[async_trait::async_trait]
pub trait Sensor: Send + std::fmt::Debug {
    /// The source this sensor produces readings for.
    fn kind(&self) -> SourceKind;

    /// The fields this sensor contributes, in record order.
    fn fields(&self) -> &'static [FieldSpec] {
        self.kind().schema().fields
    }

    /// Acquire one set of raw values, one per field.
    ///
    /// # Errors
    ///
    /// Returns a [`SensorFault`] if the instrument could not be read. The
    /// caller retries on its next cycle.
    async fn acquire(&mut self) -> Result<Acquisition, SensorFault>;

    /// Check raw instrument values against the physical envelope of their
    /// fields.
    ///
    /// Runs before the values are rounded to record precision, so a value
    /// just outside an envelope is never rounded onto its bound.
    ///
    /// # Errors
    ///
    /// Returns the first field found outside its envelope.
    fn validate(&self, values: &[f64]) -> Result<(), ValidationReject> {
        for (field, value) in self.fields().iter().zip(values) {
            match field.envelope {
                Some(envelope) if !envelope.contains(*value) => {
                    return Err(ValidationReject {
                        field: field.name,
                        value: *value,
                        envelope,
                    });
                }
                None if !value.is_finite() => {
                    return Err(ValidationReject {
                        field: field.name,
                        value: *value,
                        envelope: Envelope::new(f64::MIN, f64::MAX),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Build the sensor configured for `kind`.
#[must_use]
pub fn build(kind: SourceKind, config: &SensorConfig) -> Box<dyn Sensor> {
    match config.backend {
        Backend::Simulated => Box::new(SimulatedSensor::new(kind, config.interval())),
        Backend::Command => Box::new(CommandSensor::new(
            kind,
            config.command.clone(),
            config.read_timeout(),
            config.read_retries,
        )),
    }
}
