//! Bounded, smoothed series from a source log.
//!
//! [`summarize`] streams a log line by line and keeps only the last
//! `max_points` records, so memory stays bounded however long the mission
//! runs. Output depends only on file content and options.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::SummaryConfig;
use crate::error::{Error, Result};
use crate::reading::SourceKind;
use crate::storage::artifact;
use crate::storage::schema::{self, SEPARATOR, TIMESTAMP_COLUMN};

/// Window and smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    /// Records kept from the end of the log.
    pub max_points: usize,
    /// Moving-average window.
    pub smoothing_window: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self::from(&SummaryConfig::default())
    }
}

impl From<&SummaryConfig> for SummaryOptions {
    fn from(config: &SummaryConfig) -> Self {
        Self {
            max_points: config.max_points,
            smoothing_window: config.smoothing_window,
        }
    }
}

/// Position and value of a maximum or minimum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extremum {
    /// Index into the raw series.
    pub index: usize,
    /// Timestamp of that record.
    pub timestamp: String,
    /// The value.
    pub value: f64,
}

/// Series of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSeries {
    /// Field name.
    pub name: String,
    /// Values in the window, oldest first.
    pub raw: Vec<f64>,
    /// Centered moving average; absent if the window is shorter than the
    /// smoothing window.
    pub smoothed: Option<Vec<f64>>,
    /// Raw index that `smoothed[0]` is centered on.
    pub smoothed_offset: usize,
    /// Largest value in the window (earliest on ties).
    pub max: Option<Extremum>,
    /// Smallest value in the window (earliest on ties).
    pub min: Option<Extremum>,
}

/// Chart-ready summary of a log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Source identified from the header, if it is a known one.
    pub source: Option<SourceKind>,
    /// Log the summary was built from.
    pub log: PathBuf,
    /// Window size requested.
    pub max_points: usize,
    /// Smoothing window requested.
    pub smoothing_window: usize,
    /// Valid records seen in the whole log.
    pub total_records: usize,
    /// Lines skipped as malformed.
    pub skipped_lines: usize,
    /// Timestamps of the records in the window.
    pub timestamps: Vec<String>,
    /// One series per field, in header order.
    pub series: Vec<FieldSeries>,
}

impl Summary {
    /// Series of the named field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSeries> {
        self.series.iter().find(|series| series.name == name)
    }

    /// Number of records in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Publish as pretty JSON at `path`, keeping the previous artifact as
    /// its `_backup` sibling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the artifact cannot be written.
    pub fn publish(&self, path: &Path) -> Result<Option<PathBuf>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        artifact::publish(path, &bytes)
    }
}

/// Moving average over every run of `window` consecutive values.
///
/// Returns `n - window + 1` values, or `None` if `window` is zero or larger
/// than the input.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn moving_average(values: &[f64], window: usize) -> Option<Vec<f64>> {
    if window == 0 || values.len() < window {
        return None;
    }
    let divisor = window as f64;
    Some(
        values
            .windows(window)
            .map(|run| run.iter().sum::<f64>() / divisor)
            .collect(),
    )
}

fn extremum<F>(values: &[f64], timestamps: &[String], better: F) -> Option<Extremum>
where
    F: Fn(f64, f64) -> bool,
{
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in values.iter().copied().enumerate() {
        match best {
            Some((_, current)) if !better(value, current) => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, value)| Extremum {
        index,
        timestamp: timestamps[index].clone(),
        value,
    })
}

/// Parse one record line against `width` value columns.
fn parse_line(line: &str, width: usize) -> Option<(String, Vec<f64>)> {
    let mut columns = line.split(SEPARATOR).map(str::trim);
    let timestamp = columns.next()?;
    schema::parse_timestamp(timestamp).ok()?;

    let values = columns
        .map(|raw| raw.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()?;
    (values.len() == width).then(|| (timestamp.to_string(), values))
}

/// Build a bounded, smoothed summary of the log at `path`.
///
/// The first line must be the header. Malformed lines are skipped and
/// counted.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if `max_points` or
/// `smoothing_window` is zero, [`Error::Storage`] if the log cannot be read,
/// or [`Error::LogFormat`] if it has no header.
pub fn summarize(path: &Path, options: &SummaryOptions) -> Result<Summary> {
    if options.max_points == 0 || options.smoothing_window == 0 {
        return Err(Error::ConfigValidation {
            message: "max_points and smoothing_window must be at least 1".to_string(),
        });
    }
    let file = File::open(path).map_err(|source| Error::storage(path, source))?;
    let mut lines = BufReader::new(file).split(b'\n');

    let header = match lines.next() {
        Some(chunk) => {
            let chunk = chunk.map_err(|source| Error::storage(path, source))?;
            String::from_utf8_lossy(&chunk).trim_end().to_string()
        }
        None => String::new(),
    };
    let mut columns = header.split(SEPARATOR).map(str::trim);
    if columns.next() != Some(TIMESTAMP_COLUMN) {
        return Err(Error::LogFormat {
            path: path.to_path_buf(),
            message: "missing header line".to_string(),
        });
    }
    let fields: Vec<String> = columns.map(str::to_string).collect();
    let source = SourceKind::ALL
        .into_iter()
        .find(|kind| kind.schema().header() == header);

    let capacity = options.max_points;
    let mut window: VecDeque<(String, Vec<f64>)> = VecDeque::with_capacity(capacity);
    let mut total_records = 0;
    let mut skipped_lines = 0;

    for chunk in lines {
        let chunk = chunk.map_err(|source| Error::storage(path, source))?;
        let Ok(line) = std::str::from_utf8(&chunk) else {
            skipped_lines += 1;
            continue;
        };
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, fields.len()) {
            Some(record) => {
                total_records += 1;
                if window.len() == capacity {
                    window.pop_front();
                }
                window.push_back(record);
            }
            None => {
                skipped_lines += 1;
                debug!(path = %path.display(), line, "skipping malformed line");
            }
        }
    }

    let timestamps: Vec<String> = window.iter().map(|(ts, _)| ts.clone()).collect();
    let series = fields
        .iter()
        .enumerate()
        .map(|(column, name)| {
            let raw: Vec<f64> = window.iter().map(|(_, values)| values[column]).collect();
            FieldSeries {
                name: name.clone(),
                smoothed: moving_average(&raw, options.smoothing_window),
                smoothed_offset: options.smoothing_window.saturating_sub(1) / 2,
                max: extremum(&raw, &timestamps, |candidate, best| candidate > best),
                min: extremum(&raw, &timestamps, |candidate, best| candidate < best),
                raw,
            }
        })
        .collect();

    info!(
        path = %path.display(),
        records = total_records,
        window = timestamps.len(),
        skipped = skipped_lines,
        "log summarized"
    );

    Ok(Summary {
        source,
        log: path.to_path_buf(),
        max_points: options.max_points,
        smoothing_window: options.smoothing_window,
        total_records,
        skipped_lines,
        timestamps,
        series,
    })
}
