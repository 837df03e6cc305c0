//! Append-only per-source log.
//!
//! A log is a UTF-8 text file whose first line is the source header and
//! whose every other line is one complete record. Records are only ever
//! appended; before each append the current content is copied to the backup
//! path, so the backup is never newer than the log and the log never lacks a
//! record the backup has.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{ensure_parent_dir, write_atomic};
use crate::error::{Error, Result};
use crate::reading::{Reading, SourceKind};

/// How far back from the end `ensure` looks for the last complete line.
const TAIL_SCAN_BYTES: u64 = 64 * 1024;

/// What [`AppendLog::ensure`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The log did not exist and was created with its header.
    Created,
    /// The log existed and ended on a complete line.
    Existing,
    /// The log existed but was empty; the header was written.
    HeaderRestored,
    /// The log ended in a torn line, which was cut back to the last
    /// complete line.
    Repaired {
        /// Bytes removed from the end of the file.
        discarded_bytes: u64,
    },
}

/// Result of one successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    /// Whether the pre-write backup step succeeded.
    pub backed_up: bool,
    /// Bytes added to the log, newline included.
    pub bytes_written: usize,
}

/// An append-only record store for one data source.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: PathBuf,
    backup_path: Option<PathBuf>,
    header: String,
    sync: bool,
}

impl AppendLog {
    /// Create a handle for the log at `path` with the given header line.
    ///
    /// Nothing is touched on disk until [`AppendLog::ensure`] or
    /// [`AppendLog::append`] is called.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, header: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            backup_path: None,
            header: header.into(),
            sync: false,
        }
    }

    /// Create a handle for a source log, using the source header.
    #[must_use]
    pub fn for_source(source: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self::new(path, source.schema().header())
    }

    /// Copy the log to `backup_path` before every append.
    #[must_use]
    pub fn with_backup(mut self, backup_path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(backup_path.into());
        self
    }

    /// Flush each append to the storage device before returning.
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the backup file, if one is configured.
    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// The header line, without the trailing newline.
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Create the log with its header if it does not exist.
    ///
    /// Idempotent: an existing log that ends on a complete line is left
    /// untouched. An empty file gets its header; a file that ends in a torn
    /// line (power lost mid-write) is cut back to its last complete line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created or the
    /// file cannot be opened for writing.
    pub fn ensure(&self) -> Result<EnsureOutcome> {
        ensure_parent_dir(&self.path)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                self.write_header(&mut file)?;
                info!(path = %self.path.display(), "created log");
                Ok(EnsureOutcome::Created)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => self.heal_existing(),
            Err(source) => Err(Error::storage(&self.path, source)),
        }
    }

    fn heal_existing(&self) -> Result<EnsureOutcome> {
        let storage = |source| Error::storage(&self.path, source);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(storage)?;
        let len = file.metadata().map_err(storage)?.len();

        if len == 0 {
            self.write_header(&mut file)?;
            warn!(path = %self.path.display(), "log was empty, header restored");
            return Ok(EnsureOutcome::HeaderRestored);
        }

        let tail_start = len.saturating_sub(TAIL_SCAN_BYTES);
        file.seek(SeekFrom::Start(tail_start)).map_err(storage)?;
        let mut tail = Vec::new();
        (&mut file)
            .take(len - tail_start)
            .read_to_end(&mut tail)
            .map_err(storage)?;

        if tail.last() == Some(&b'\n') {
            debug!(path = %self.path.display(), "log already initialized");
            return Ok(EnsureOutcome::Existing);
        }

        let outcome = match tail.iter().rposition(|b| *b == b'\n') {
            Some(pos) => {
                let keep = tail_start + pos as u64 + 1;
                file.set_len(keep).map_err(storage)?;
                EnsureOutcome::Repaired {
                    discarded_bytes: len - keep,
                }
            }
            None if tail_start == 0 => {
                // Not even the header made it to disk.
                file.set_len(0).map_err(storage)?;
                file.seek(SeekFrom::Start(0)).map_err(storage)?;
                self.write_header(&mut file)?;
                EnsureOutcome::Repaired {
                    discarded_bytes: len,
                }
            }
            None => {
                // Torn line longer than the scan window: terminate it so the
                // next record starts on a fresh line. Readers skip it.
                file.seek(SeekFrom::End(0)).map_err(storage)?;
                file.write_all(b"\n").map_err(storage)?;
                EnsureOutcome::Repaired { discarded_bytes: 0 }
            }
        };
        file.sync_all().map_err(storage)?;
        warn!(path = %self.path.display(), ?outcome, "repaired torn log tail");
        Ok(outcome)
    }

    fn write_header(&self, file: &mut File) -> Result<()> {
        let mut line = self.header.clone();
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|source| Error::storage(&self.path, source))
    }

    /// Append one record.
    ///
    /// In order: copy the log to the backup path (best effort, a failure is
    /// logged and reported in the returned [`AppendReport`]); then open the
    /// log in append mode and write the record and its newline in a single
    /// write. Existing bytes are never rewritten. If the log has vanished it
    /// is recreated with its header first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the log cannot be opened or written, or
    /// [`Error::Internal`] if `record` contains a line break.
    pub fn append(&self, record: &str) -> Result<AppendReport> {
        if record.contains(['\n', '\r']) {
            return Err(Error::internal("record contains a line break"));
        }
        if !self.path.exists() {
            self.ensure()?;
        }

        let backed_up = match &self.backup_path {
            Some(backup) => match self.copy_to_backup(backup) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        fault = %e.kind(),
                        error = %e,
                        "backup step failed, appending anyway"
                    );
                    false
                }
            },
            None => false,
        };

        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        let storage = |source| Error::storage(&self.path, source);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(storage)?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(storage)?;
        if self.sync {
            file.sync_data().map_err(storage)?;
        }

        Ok(AppendReport {
            backed_up,
            bytes_written: line.len(),
        })
    }

    /// Append a reading encoded as a record.
    ///
    /// # Errors
    ///
    /// See [`AppendLog::append`].
    pub fn append_reading(&self, reading: &Reading) -> Result<AppendReport> {
        self.append(&reading.to_record())
    }

    fn copy_to_backup(&self, backup: &Path) -> Result<()> {
        write_atomic(backup, |out| {
            let mut src = File::open(&self.path).map_err(|e| Error::storage(&self.path, e))?;
            std::io::copy(&mut src, out).map_err(|e| Error::storage(backup, e))?;
            Ok(())
        })
    }

    /// The newest record line, if the log has any.
    ///
    /// Only the final window of the file is read, so the cost does not grow
    /// with the length of the flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the log exists but cannot be read.
    pub fn last_record(&self) -> Result<Option<String>> {
        let storage = |source| Error::storage(&self.path, source);
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(storage(source)),
        };

        let len = file.metadata().map_err(storage)?.len();
        let tail_start = len.saturating_sub(TAIL_SCAN_BYTES);
        file.seek(SeekFrom::Start(tail_start)).map_err(storage)?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail).map_err(storage)?;

        let mut lines = tail.split(|byte| *byte == b'\n');
        if tail_start > 0 {
            // Partial line cut by the window.
            lines.next();
        }
        let at_file_start = tail_start == 0;
        let last = lines
            .enumerate()
            .filter_map(|(index, chunk)| {
                let line = std::str::from_utf8(chunk).ok()?.trim_end();
                let is_header = at_file_start && index == 0 && line == self.header;
                (!line.is_empty() && !is_header).then_some(line)
            })
            .last()
            .map(str::to_string);
        Ok(last)
    }

    /// The newest record decoded as a reading of `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the log cannot be read, or
    /// [`Error::Record`] if its last line is not a valid `source` record.
    pub fn last_reading(&self, source: SourceKind) -> Result<Option<Reading>> {
        match self.last_record()? {
            Some(line) => Ok(Some(Reading::from_record(source, &line)?)),
            None => Ok(None),
        }
    }
}
