//! Local filesystem layout for governance state.
//!
//! Everything the engine persists lives under one config root, by default
//! `<home>/.openclaw/clawforge/`. Tests point the root at a temp directory.

use std::path::{Path, PathBuf};

/// Name of the durable audit buffer file.
pub const AUDIT_BUFFER_FILENAME: &str = "audit-buffer.jsonl";

/// Name of the persisted session file.
pub const SESSION_FILENAME: &str = "session.json";

/// The directory holding all governance state for this user.
#[derive(Debug, Clone)]
pub struct ConfigRoot {
    dir: PathBuf,
}

impl ConfigRoot {
    /// The default root under the user's home directory.
    ///
    /// Returns `None` when no home directory can be determined.
    #[must_use]
    pub fn discover() -> Option<Self> {
        directories::BaseDirs::new().map(|dirs| Self {
            dir: dirs.home_dir().join(".openclaw").join("clawforge"),
        })
    }

    /// A root at an explicit directory.
    #[must_use]
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the durable audit buffer.
    #[must_use]
    pub fn audit_buffer_file(&self) -> PathBuf {
        self.dir.join(AUDIT_BUFFER_FILENAME)
    }

    /// Path of the persisted session tokens.
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.dir.join(SESSION_FILENAME)
    }
}
