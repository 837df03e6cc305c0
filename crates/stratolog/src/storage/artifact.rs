//! Generated artifacts with a one-previous-version safety net.
//!
//! Publishing `charts/motion_summary.json` first renames the current file to
//! `charts/motion_summary_backup.json`, then writes the new content through a
//! temporary file that is atomically renamed into place.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::write_atomic;
use crate::error::{Error, Result};

/// Backup path for an artifact: `<stem>_backup.<ext>` next to it.
#[must_use]
pub fn backup_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_backup.{}", ext.to_string_lossy()),
        None => format!("{stem}_backup"),
    };
    path.with_file_name(name)
}

/// Publish `bytes` at `path`, keeping the previous artifact as its backup.
///
/// Returns the backup path if a previous artifact was moved there.
///
/// # Errors
///
/// Returns [`Error::Storage`] if the previous artifact cannot be moved or
/// the new one cannot be written.
pub fn publish(path: &Path, bytes: &[u8]) -> Result<Option<PathBuf>> {
    let backup = backup_path_for(path);
    let kept = if path.exists() {
        std::fs::rename(path, &backup).map_err(|source| Error::storage(&backup, source))?;
        debug!(from = %path.display(), to = %backup.display(), "previous artifact kept");
        Some(backup)
    } else {
        None
    };

    write_atomic(path, |out| out.write_all(bytes).map_err(Error::from))?;
    info!(path = %path.display(), bytes = bytes.len(), "artifact published");
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_for() {
        assert_eq!(
            backup_path_for(Path::new("charts/motion_summary.json")),
            PathBuf::from("charts/motion_summary_backup.json")
        );
        assert_eq!(
            backup_path_for(Path::new("charts/plot")),
            PathBuf::from("charts/plot_backup")
        );
    }

    #[test]
    fn test_first_publish_has_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts/acoustic_summary.json");

        let kept = publish(&path, b"{\"v\":1}").unwrap();

        assert_eq!(kept, None);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"v\":1}");
        assert!(!backup_path_for(&path).exists());
    }

    #[test]
    fn test_publish_keeps_one_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motion_summary.json");

        publish(&path, b"one").unwrap();
        publish(&path, b"two").unwrap();
        let kept = publish(&path, b"three").unwrap();

        assert_eq!(kept, Some(backup_path_for(&path)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "three");
        assert_eq!(
            std::fs::read_to_string(backup_path_for(&path)).unwrap(),
            "two"
        );
    }
}
