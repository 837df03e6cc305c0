//! Storage layer for stratolog.
//!
//! All persistence is plain files on the payload's SD card:
//! - one append-only log per source ([`AppendLog`]), with a before-write backup
//! - one shared live-state document ([`LiveStateStore`]) written by every worker
//! - generated artifacts published with a one-previous-version backup
//!   ([`artifact`])
//!
//! Whole-file rewrites go through [`write_atomic`], which writes a private
//! temporary file in the destination directory and renames it over the
//! visible path, so readers see either the old or the new content.

pub mod append_log;
pub mod artifact;
pub mod live_state;
pub mod schema;

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub use append_log::{AppendLog, AppendReport, EnsureOutcome};
pub use live_state::{LiveState, LiveStateStore};

/// Create the parent directory of `path` if it is missing.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| Error::storage(parent, source))?;
        }
    }
    Ok(())
}

/// Replace `path` with the bytes produced by `fill`, atomically.
///
/// The temporary file is unique per call, so independent processes writing
/// the same destination never share a scratch file.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| Error::storage(dir, source))?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut()
        .flush()
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|source| Error::storage(tmp.path(), source))?;
    tmp.persist(path)
        .map_err(|e| Error::storage(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_creates_parent_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, |w| w.write_all(b"{}").map_err(Error::from)).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, |w| w.write_all(b"new").map_err(Error::from)).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_write_atomic_failed_fill_keeps_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");
        std::fs::write(&path, "old").unwrap();

        let result = write_atomic(&path, |w| {
            w.write_all(b"half").map_err(Error::from)?;
            Err(Error::internal("serializer failed"))
        });

        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
    }
}
