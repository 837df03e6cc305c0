//! Record layouts for the per-source log files.
//!
//! Each source has a fixed header naming the timestamp column followed by
//! its numeric fields. The header and the field order never change for the
//! lifetime of a log.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::reading::SourceKind;

/// Name of the first column of every log.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Column separator used by log records.
pub const SEPARATOR: char = ',';

/// Record timestamp format: UTC, second resolution, lexically sortable.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inclusive physical bounds for a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Smallest accepted value.
    pub min: f64,
    /// Largest accepted value.
    pub max: f64,
}

impl Envelope {
    /// Create an envelope from inclusive bounds.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies within the bounds. NaN never does.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One numeric column of a log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Column name, also used as the live-state key.
    pub name: &'static str,
    /// Decimal places kept when the value is recorded.
    pub precision: usize,
    /// Physical envelope, if the field has one.
    pub envelope: Option<Envelope>,
}

impl FieldSpec {
    const fn new(name: &'static str, precision: usize, envelope: Option<Envelope>) -> Self {
        Self {
            name,
            precision,
            envelope,
        }
    }

    /// Round `value` to the recorded precision.
    #[must_use]
    pub fn quantize(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return value;
        }
        let scale = 10f64.powi(i32::try_from(self.precision).unwrap_or(i32::MAX));
        (value * scale).round() / scale
    }

    /// Render `value` the way it appears in a record.
    #[must_use]
    pub fn format(&self, value: f64) -> String {
        format!("{value:.prec$}", prec = self.precision)
    }
}

/// The fixed header schema of one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schema {
    /// The source this schema belongs to.
    pub source: SourceKind,
    /// Numeric fields in record order.
    pub fields: &'static [FieldSpec],
}

impl Schema {
    /// The header line, without the trailing newline.
    #[must_use]
    pub fn header(&self) -> String {
        let mut header = String::from(TIMESTAMP_COLUMN);
        for field in self.fields {
            header.push(SEPARATOR);
            header.push_str(field.name);
        }
        header
    }

    /// Field names in record order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name)
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Humidity envelope of the DHT11 element.
pub const HUMIDITY_ENVELOPE: Envelope = Envelope::new(20.0, 90.0);

/// Accelerometer full-scale range at the default ±2 g setting.
pub const ACCEL_ENVELOPE: Envelope = Envelope::new(-2.0, 2.0);

/// Gyroscope full-scale range at the default ±250 °/s setting, plus one LSB.
pub const GYRO_ENVELOPE: Envelope = Envelope::new(-250.2, 250.2);

/// Digital pins read as 0 or 1.
pub const BINARY_ENVELOPE: Envelope = Envelope::new(0.0, 1.0);

static HUMIDITY_TEMPERATURE_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new("temperature", 1, None),
    FieldSpec::new("humidity", 1, Some(HUMIDITY_ENVELOPE)),
];

static MOTION_FIELDS: [FieldSpec; 6] = [
    FieldSpec::new("accel_x", 4, Some(ACCEL_ENVELOPE)),
    FieldSpec::new("accel_y", 4, Some(ACCEL_ENVELOPE)),
    FieldSpec::new("accel_z", 4, Some(ACCEL_ENVELOPE)),
    FieldSpec::new("gyro_x", 4, Some(GYRO_ENVELOPE)),
    FieldSpec::new("gyro_y", 4, Some(GYRO_ENVELOPE)),
    FieldSpec::new("gyro_z", 4, Some(GYRO_ENVELOPE)),
];

static ACOUSTIC_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new("sound_detected", 0, Some(BINARY_ENVELOPE)),
    FieldSpec::new("is_buzzer_on", 0, Some(BINARY_ENVELOPE)),
];

static HUMIDITY_TEMPERATURE: Schema = Schema {
    source: SourceKind::HumidityTemperature,
    fields: &HUMIDITY_TEMPERATURE_FIELDS,
};

static MOTION: Schema = Schema {
    source: SourceKind::Motion,
    fields: &MOTION_FIELDS,
};

static ACOUSTIC: Schema = Schema {
    source: SourceKind::Acoustic,
    fields: &ACOUSTIC_FIELDS,
};

/// The schema for a source.
#[must_use]
pub fn schema_for(source: SourceKind) -> &'static Schema {
    match source {
        SourceKind::HumidityTemperature => &HUMIDITY_TEMPERATURE,
        SourceKind::Motion => &MOTION,
        SourceKind::Acoustic => &ACOUSTIC,
    }
}

/// Format a timestamp for a record.
#[must_use]
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a record timestamp.
///
/// # Errors
///
/// Returns the chrono parse error if `raw` is not in [`TIMESTAMP_FORMAT`].
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}
