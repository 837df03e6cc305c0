//! Synthetic instruments for bench runs.
//!
//! Used when no hardware helper is configured. Values are a pure function
//! of the sample index, so two runs with the same cadence produce the same
//! series.

use std::time::Duration;

use tracing::trace;

use super::{Acquisition, Sensor, SensorFault};
use crate::reading::SourceKind;

/// Samples per buzzer phase in the acoustic test pattern.
const BUZZER_PHASE_SAMPLES: u64 = 5;

/// A sensor that fabricates plausible readings.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    kind: SourceKind,
    interval: Duration,
    sample: u64,
}

impl SimulatedSensor {
    /// Create a simulated sensor sampled every `interval`.
    #[must_use]
    pub fn new(kind: SourceKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            sample: 0,
        }
    }

    /// Number of samples produced so far.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.sample
    }

    #[allow(clippy::cast_precision_loss)]
    fn values_at(&self, sample: u64) -> Vec<f64> {
        let t = sample as f64 * self.interval.as_secs_f64();
        match self.kind {
            SourceKind::HumidityTemperature => vec![
                21.0 + 3.0 * (t / 600.0).sin(),
                45.0 + 10.0 * (t / 900.0).sin(),
            ],
            // 1 g on Z plus slow drift and small rotations.
            SourceKind::Motion => {
                let phase = (t % 10.0) / 10.0;
                vec![
                    0.01 + 0.05 * phase,
                    0.05 + 0.1 * phase,
                    1.0 + 0.02 * (t * 0.1).sin(),
                    0.1 * (t * 0.2).cos(),
                    0.1 * (t * 0.3).sin(),
                    0.05 * (t * 0.15).cos(),
                ]
            }
            SourceKind::Acoustic => {
                let buzzer_on = (sample / BUZZER_PHASE_SAMPLES) % 2 == 0;
                let level = if buzzer_on { 1.0 } else { 0.0 };
                vec![level, level]
            }
        }
    }
}

#[async_trait::async_trait]
impl Sensor for SimulatedSensor {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn acquire(&mut self) -> Result<Acquisition, SensorFault> {
        let values = self.values_at(self.sample);
        self.sample += 1;
        trace!(source = %self.kind, ?values, "simulated sample");
        Ok(Some(values))
    }
}
