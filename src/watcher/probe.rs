//! Filesystem metadata probe.
//!
//! The history store never touches the filesystem directly; it asks a
//! [`FileProbe`] whether a file exists, when it was last modified and whether
//! it can currently be opened without racing a writer.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::error::WatchError;

/// Swappable view of filesystem metadata.
pub trait FileProbe: Send + Sync {
    /// Whether a regular file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Last-modified timestamp of the file.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::FileNotFound`] if the file is missing, or
    /// [`WatchError::Io`] for any other metadata failure.
    fn last_modified(&self, path: &Path) -> Result<DateTime<Utc>, WatchError>;

    /// Whether the file can be opened right now for a consistent read.
    ///
    /// This is a heuristic, not a lock: returning `true` does not stop a
    /// writer from starting afterwards.
    fn can_open_exclusively(&self, path: &Path) -> bool;
}

/// [`FileProbe`] backed by `std::fs`.
///
/// On Windows the readability check opens the file with no sharing, so any
/// other open handle makes it fail. Elsewhere file locks are advisory and
/// ordinary writers never take them, so the check only rejects files that
/// cannot be opened or are empty. A writer that is partway through a
/// non-empty file is not detected there.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FsProbe {
    /// Create a new filesystem probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[cfg(windows)]
    fn open_exclusive(path: &Path) -> std::io::Result<File> {
        use std::os::windows::fs::OpenOptionsExt;
        // Deny all sharing so a concurrent writer makes the open fail.
        OpenOptions::new().read(true).share_mode(0).open(path)
    }

    // Plain read open; no sharing mode exists to deny a concurrent writer.
    #[cfg(not(windows))]
    fn open_exclusive(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().read(true).open(path)
    }
}

impl FileProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn last_modified(&self, path: &Path) -> Result<DateTime<Utc>, WatchError> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WatchError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(WatchError::Io(e)),
        };
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    fn can_open_exclusively(&self, path: &Path) -> bool {
        let Ok(file) = Self::open_exclusive(path) else {
            return false;
        };
        // An empty file is treated as a writer that has truncated but not
        // yet written.
        file.metadata().is_ok_and(|m| m.len() > 0)
    }
}
