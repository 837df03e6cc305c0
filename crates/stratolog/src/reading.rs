//! Core reading types for stratolog.
//!
//! This module defines the fundamental data structures for representing
//! one timestamped sample from an instrument, and its record encoding.

use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::schema::{self, Schema, SEPARATOR};

/// The instrument family that produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// DHT11 temperature and relative humidity.
    HumidityTemperature,
    /// MPU-6050 acceleration and angular velocity.
    Motion,
    /// KY-038 sound detector with the test buzzer state.
    Acoustic,
}

impl SourceKind {
    /// Every source, in launch order.
    pub const ALL: [Self; 3] = [Self::HumidityTemperature, Self::Motion, Self::Acoustic];

    /// Stable identifier used on the command line and in the live state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HumidityTemperature => "humidity-temperature",
            Self::Motion => "motion",
            Self::Acoustic => "acoustic",
        }
    }

    /// Operator-facing name of the worker unit for this source.
    #[must_use]
    pub const fn unit_name(&self) -> &'static str {
        match self {
            Self::HumidityTemperature => "DHT Logger",
            Self::Motion => "MPU Logger",
            Self::Acoustic => "Sound Logger",
        }
    }

    /// The fixed log schema of this source.
    #[must_use]
    pub fn schema(&self) -> &'static Schema {
        schema::schema_for(*self)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RecordError::UnknownSource(s.to_string()))
    }
}

/// Errors produced while building, encoding or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The number of values does not match the schema.
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Fields required by the schema.
        expected: usize,
        /// Fields actually present.
        found: usize,
    },

    /// The timestamp column could not be parsed.
    #[error("bad timestamp '{0}'")]
    Timestamp(String),

    /// A value column is not numeric.
    #[error("field '{field}' is not numeric: '{raw}'")]
    Value {
        /// Column name.
        field: &'static str,
        /// The offending text.
        raw: String,
    },

    /// The source identifier is not known.
    #[error("unknown source '{0}'")]
    UnknownSource(String),
}

/// One timestamped sample from an instrument.
///
/// Readings are immutable once created. Values are stored already rounded to
/// the precision of their schema field, so what a worker publishes to the
/// live state is exactly what it recorded in its log.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    source: SourceKind,
    timestamp: DateTime<Utc>,
    values: Vec<f64>,
}

impl Reading {
    /// Create a reading for `source` at `timestamp`.
    ///
    /// The timestamp is truncated to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::FieldCount`] if `values` does not have one
    /// entry per schema field.
    pub fn new(
        source: SourceKind,
        timestamp: DateTime<Utc>,
        values: Vec<f64>,
    ) -> Result<Self, RecordError> {
        let schema = source.schema();
        if values.len() != schema.fields.len() {
            return Err(RecordError::FieldCount {
                expected: schema.fields.len(),
                found: values.len(),
            });
        }
        let values = schema
            .fields
            .iter()
            .zip(values)
            .map(|(field, value)| field.quantize(value))
            .collect();
        Ok(Self {
            source,
            timestamp: timestamp.trunc_subsecs(0),
            values,
        })
    }

    /// Create a reading stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`Reading::new`].
    pub fn now(source: SourceKind, values: Vec<f64>) -> Result<Self, RecordError> {
        Self::new(source, Utc::now(), values)
    }

    /// The source that produced this reading.
    #[must_use]
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// When the reading was taken.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Values in schema order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value of the named field.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.fields().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// `(name, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.source
            .schema()
            .field_names()
            .zip(self.values.iter().copied())
    }

    /// Encode as one log line, without the trailing newline.
    #[must_use]
    pub fn to_record(&self) -> String {
        let mut line = schema::format_timestamp(&self.timestamp);
        for (field, value) in self.source.schema().fields.iter().zip(&self.values) {
            line.push(SEPARATOR);
            line.push_str(&field.format(*value));
        }
        line
    }

    /// Decode one log line written for `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`] if the line has the wrong number of
    /// columns, a bad timestamp, or a non-numeric value.
    pub fn from_record(source: SourceKind, line: &str) -> Result<Self, RecordError> {
        let schema = source.schema();
        let parts: Vec<&str> = line.trim_end().split(SEPARATOR).map(str::trim).collect();
        if parts.len() != schema.fields.len() + 1 {
            return Err(RecordError::FieldCount {
                expected: schema.fields.len(),
                found: parts.len().saturating_sub(1),
            });
        }

        let timestamp = schema::parse_timestamp(parts[0])
            .map_err(|_| RecordError::Timestamp(parts[0].to_string()))?;

        let values = schema
            .fields
            .iter()
            .zip(&parts[1..])
            .map(|(field, raw)| {
                raw.parse::<f64>().map_err(|_| RecordError::Value {
                    field: field.name,
                    raw: (*raw).to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(source, timestamp, values)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 4, h, m, s).unwrap()
    }

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::HumidityTemperature.to_string(), "humidity-temperature");
        assert_eq!(SourceKind::Motion.to_string(), "motion");
        assert_eq!(SourceKind::Acoustic.to_string(), "acoustic");
    }

    #[test]
    fn test_source_kind_from_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!(matches!(
            "pressure".parse::<SourceKind>(),
            Err(RecordError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_source_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&SourceKind::HumidityTemperature).unwrap();
        assert_eq!(json, "\"humidity-temperature\"");
    }

    #[test]
    fn test_reading_new_rejects_wrong_count() {
        let err = Reading::new(SourceKind::Motion, at(10, 0, 0), vec![0.0; 3]).unwrap_err();
        assert_eq!(
            err,
            RecordError::FieldCount {
                expected: 6,
                found: 3
            }
        );
    }

    #[test]
    fn test_reading_truncates_subseconds() {
        let ts = at(10, 0, 0) + chrono::Duration::milliseconds(750);
        let reading = Reading::new(SourceKind::HumidityTemperature, ts, vec![21.0, 45.0]).unwrap();
        assert_eq!(reading.timestamp(), at(10, 0, 0));
    }

    #[test]
    fn test_reading_named_values() {
        let reading =
            Reading::new(SourceKind::HumidityTemperature, at(10, 0, 0), vec![21.04, 45.66])
                .unwrap();
        assert_eq!(reading.value("temperature"), Some(21.0));
        assert_eq!(reading.value("humidity"), Some(45.7));
        assert_eq!(reading.value("accel_x"), None);
        let names: Vec<_> = reading.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["temperature", "humidity"]);
    }

    #[test]
    fn test_record_encoding() {
        let reading =
            Reading::new(SourceKind::HumidityTemperature, at(9, 5, 3), vec![21.0, 45.0]).unwrap();
        assert_eq!(reading.to_record(), "2026-07-04 09:05:03,21.0,45.0");

        let motion = Reading::new(
            SourceKind::Motion,
            at(9, 5, 3),
            vec![0.01, -0.02, 1.0, 0.5, -0.25, 0.125],
        )
        .unwrap();
        assert_eq!(
            motion.to_record(),
            "2026-07-04 09:05:03,0.0100,-0.0200,1.0000,0.5000,-0.2500,0.1250"
        );
    }

    #[test]
    fn test_record_round_trip_within_precision() {
        let original = Reading::new(
            SourceKind::Motion,
            at(12, 30, 0),
            vec![0.012_345, -1.999_99, 0.987_65, 12.345_67, -249.9, 0.000_04],
        )
        .unwrap();
        let decoded = Reading::from_record(SourceKind::Motion, &original.to_record()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_from_record_accepts_trailing_newline() {
        let reading =
            Reading::from_record(SourceKind::Acoustic, "2026-07-04 09:05:03,1,0\n").unwrap();
        assert_eq!(reading.values(), &[1.0, 0.0]);
    }

    #[test]
    fn test_from_record_rejects_short_line() {
        let err = Reading::from_record(SourceKind::HumidityTemperature, "2026-07-04 09:05:03,21.0")
            .unwrap_err();
        assert!(matches!(err, RecordError::FieldCount { .. }));
    }

    #[test]
    fn test_from_record_rejects_non_numeric() {
        let err =
            Reading::from_record(SourceKind::HumidityTemperature, "2026-07-04 09:05:03,hot,45.0")
                .unwrap_err();
        assert_eq!(
            err,
            RecordError::Value {
                field: "temperature",
                raw: "hot".to_string()
            }
        );
    }

    #[test]
    fn test_from_record_rejects_bad_timestamp() {
        let err = Reading::from_record(SourceKind::HumidityTemperature, "noon,21.0,45.0")
            .unwrap_err();
        assert!(matches!(err, RecordError::Timestamp(_)));
    }
}
