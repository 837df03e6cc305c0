//! Shared "latest value" document.
//!
//! Every worker process merges its own fields into the same JSON file with a
//! read-merge-write cycle and no cross-process lock. Each source only ever
//! overlays the fields it contributes, and the write goes through
//! [`write_atomic`], so readers see a well-formed document or the previous
//! one. Two sources that overlap exactly between read and write can lose one
//! update of the other's fields; the next tick restores it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::schema::format_timestamp;
use super::write_atomic;
use crate::error::{Error, Result};
use crate::reading::Reading;

/// Contents of the live-state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveState {
    /// Latest value of every field reported so far.
    pub fields: BTreeMap<String, f64>,
    /// Timestamp of the latest update, per source.
    pub updated: BTreeMap<String, String>,
}

impl LiveState {
    /// Latest value of `field`, if any source has reported it.
    #[must_use]
    pub fn field(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied()
    }

    /// When `source` last updated, as written in the file.
    #[must_use]
    pub fn updated_at(&self, source: &str) -> Option<&str> {
        self.updated.get(source).map(String::as_str)
    }

    /// Whether no source has reported yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.updated.is_empty()
    }

    fn overlay(&mut self, source: &str, fields: &[(&str, f64)], timestamp: &DateTime<Utc>) {
        for (name, value) in fields {
            if value.is_finite() {
                self.fields.insert((*name).to_string(), *value);
            }
        }
        self.updated
            .insert(source.to_string(), format_timestamp(timestamp));
    }
}

/// Handle to the live-state file.
#[derive(Debug, Clone)]
pub struct LiveStateStore {
    path: PathBuf,
}

impl LiveStateStore {
    /// Create a handle for the live-state file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the live-state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state.
    ///
    /// Never fails: an absent, unreadable or unparseable file reads as the
    /// empty state.
    #[must_use]
    pub fn read(&self) -> LiveState {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LiveState::default(),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "live state unreadable");
                return LiveState::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "live state unparseable, starting empty"
                );
                LiveState::default()
            }
        }
    }

    /// Merge `fields` reported by `source` at `timestamp` and write the
    /// whole document back.
    ///
    /// Only the named fields and the timestamp of `source` change; every
    /// other entry is carried over from the current file. Non-finite values
    /// are not written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the merged document cannot be written.
    /// The previous file is left intact in that case.
    pub fn update(
        &self,
        source: &str,
        fields: &[(&str, f64)],
        timestamp: &DateTime<Utc>,
    ) -> Result<LiveState> {
        let mut state = self.read();
        state.overlay(source, fields, timestamp);

        write_atomic(&self.path, |out| {
            serde_json::to_writer_pretty(&mut *out, &state).map_err(Error::from)?;
            out.write_all(b"\n").map_err(Error::from)
        })?;

        debug!(path = %self.path.display(), source, fields = fields.len(), "live state updated");
        Ok(state)
    }

    /// Merge the fields of `reading` under its source identifier.
    ///
    /// # Errors
    ///
    /// See [`LiveStateStore::update`].
    pub fn update_reading(&self, reading: &Reading) -> Result<LiveState> {
        let fields: Vec<(&str, f64)> = reading.fields().collect();
        self.update(reading.source().as_str(), &fields, &reading.timestamp())
    }
}
