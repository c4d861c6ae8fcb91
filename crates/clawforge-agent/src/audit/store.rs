//! Durable audit buffer file.
//!
//! The crash-resilience mirror of the in-memory buffer: one JSON-encoded
//! event per line, rewritten in full on each persist. The pipeline is the
//! only writer. Durability is best-effort: an unclean crash may lose the
//! last few seconds of events.

use std::path::{Path, PathBuf};

use clawforge_core::audit::AuditEvent;
use tracing::{debug, warn};

use crate::fs_safe::{write_private_atomic, FsError};

/// Owner of the on-disk audit buffer file.
#[derive(Debug)]
pub struct DurableAuditBuffer {
    path: PathBuf,
}

impl DurableAuditBuffer {
    /// Create a store at the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all persisted events, in file order.
    ///
    /// A missing file is an empty buffer. Malformed lines are skipped; a
    /// corrupt line must not cost the events around it. Read failures are
    /// logged and yield an empty buffer; governance continues in memory.
    #[must_use]
    pub fn load(&self) -> Vec<AuditEvent> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read audit buffer");
                return Vec::new();
            },
        };

        let mut events = Vec::new();
        let mut skipped = 0usize;
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(
                path = %self.path.display(),
                skipped,
                "skipped malformed audit buffer lines"
            );
        }
        events
    }

    /// Rewrite the file with the given events.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the atomic write fails.
    pub fn persist(&self, events: &[AuditEvent]) -> Result<(), StoreError> {
        let mut data = String::new();
        for event in events {
            data.push_str(&serde_json::to_string(event)?);
            data.push('\n');
        }
        write_private_atomic(&self.path, data.as_bytes())?;
        Ok(())
    }

    /// Empty the file after a successful ship-and-acknowledge.
    ///
    /// # Errors
    ///
    /// Returns an error when the write fails.
    pub fn clear(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            write_private_atomic(&self.path, b"")?;
        }
        Ok(())
    }
}

/// Errors from audit buffer persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Event serialization failed.
    #[error("failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The file write failed.
    #[error(transparent)]
    Fs(#[from] FsError),
}

#[cfg(test)]
mod tests {
    use clawforge_core::audit::{EventDraft, EventKind, EventOutcome};

    use super::*;

    fn event(tool: &str) -> AuditEvent {
        EventDraft::new(EventKind::ToolCallAttempt, EventOutcome::Allowed)
            .with_tool_name(tool)
            .into_event("u", "o", false)
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableAuditBuffer::new(dir.path().join("audit-buffer.jsonl"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_persist_then_load_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableAuditBuffer::new(dir.path().join("audit-buffer.jsonl"));

        let events = vec![event("read"), event("write"), event("exec")];
        store.persist(&events).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, events);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit-buffer.jsonl");
        let store = DurableAuditBuffer::new(&path);

        let good = serde_json::to_string(&event("read")).unwrap();
        std::fs::write(&path, format!("{good}\nnot json at all\n{good}\n")).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_clear_empties_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableAuditBuffer::new(dir.path().join("audit-buffer.jsonl"));

        store.persist(&[event("read")]).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_empty());
    }
}
