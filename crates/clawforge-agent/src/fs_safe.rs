//! Private atomic file writes for governance state.
//!
//! Both persisted files (audit buffer, session tokens) are written with the
//! temp-file + rename protocol so a crash mid-write leaves either the old
//! complete file or the new complete file, never a partial one. Files are
//! owner read/write only; the state directory is created 0700.

use std::io::Write;
use std::path::Path;

/// Errors from private file persistence.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The target path has no parent directory.
    #[error("path has no parent directory: {0}")]
    NoParent(String),

    /// An underlying filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Create `dir` (and parents) with owner-only permissions.
///
/// # Errors
///
/// Returns an error if directory creation fails.
pub fn ensure_private_dir(dir: &Path) -> Result<(), FsError> {
    if dir.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .map_err(|e| FsError::io("create state directory", e))
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir).map_err(|e| FsError::io("create state directory", e))
    }
}

/// Write `data` to `path` atomically with mode 0600.
///
/// The temp file is created in the same directory as `path` so the final
/// rename stays on one filesystem. `tempfile` creates it 0600 on Unix, and
/// the rename preserves that mode.
///
/// # Errors
///
/// Returns an error if any filesystem operation fails.
pub fn write_private_atomic(path: &Path, data: &[u8]) -> Result<(), FsError> {
    let parent = path
        .parent()
        .ok_or_else(|| FsError::NoParent(path.display().to_string()))?;

    ensure_private_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| FsError::io("create temp file", e))?;
    tmp.write_all(data)
        .map_err(|e| FsError::io("write temp file", e))?;
    tmp.flush().map_err(|e| FsError::io("flush temp file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| FsError::io("fsync temp file", e))?;
    tmp.persist(path)
        .map_err(|e| FsError::io("rename into place", e.error))?;

    Ok(())
}
