//! Audit event pipeline.
//!
//! Accepts events from the enforcer and the governance tasks, buffers them
//! in memory (bounded, oldest dropped), mirrors the unacknowledged buffer to
//! disk, and ships ordered batches to the control plane with at-least-once
//! semantics. The enqueue path is synchronous and never blocks on I/O; all
//! shipping happens on the pipeline's own background task.

mod store;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use clawforge_core::audit::{AuditEvent, BoundedBuffer, EventDraft};
use clawforge_core::config::GovernanceConfig;
use clawforge_core::policy::AuditLevel;
use secrecy::SecretString;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use store::{DurableAuditBuffer, StoreError};

use crate::client::ControlPlaneClient;

/// What a flush accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// No control plane configured; the buffer was mirrored to disk.
    Persisted(usize),
    /// The batch was accepted by the control plane.
    Shipped(usize),
    /// The ship failed; the batch was requeued and re-persisted.
    Requeued(usize),
}

struct PipelineShared {
    buffer: Mutex<BoundedBuffer>,
    store: DurableAuditBuffer,
    client: Option<Arc<ControlPlaneClient>>,
    user_id: String,
    org_id: String,
    audit_level: RwLock<AuditLevel>,
    access_token: RwLock<SecretString>,
    batch_size: usize,
    flush_signal: Notify,
}

impl PipelineShared {
    fn enqueue(&self, draft: EventDraft) {
        let level = *self
            .audit_level
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if level == AuditLevel::Off {
            return;
        }

        let event = draft.into_event(
            self.user_id.clone(),
            self.org_id.clone(),
            level == AuditLevel::Full,
        );

        let batch_ready = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push(event);
            self.batch_size > 0 && buffer.len() >= self.batch_size
        };
        if batch_ready {
            self.flush_signal.notify_one();
        }
    }

    async fn flush(&self) -> FlushOutcome {
        let Some(client) = &self.client else {
            // No control plane: the disk file mirrors the whole in-memory
            // buffer, which keeps waiting for one to be configured.
            let snapshot: Vec<AuditEvent> = {
                let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buffer.iter().cloned().collect()
            };
            if snapshot.is_empty() {
                return FlushOutcome::Empty;
            }
            if let Err(e) = self.store.persist(&snapshot) {
                warn!(error = %e, "failed to persist audit buffer");
            }
            return FlushOutcome::Persisted(snapshot.len());
        };

        let batch = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.detach()
        };
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match client.ship_events(&self.org_id, &token, &batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "shipped audit batch");
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "failed to clear audit buffer file");
                }
                FlushOutcome::Shipped(batch.len())
            },
            Err(e) => {
                warn!(error = %e, count = batch.len(), "audit ship failed; requeueing batch");
                let snapshot: Vec<AuditEvent> = {
                    let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    buffer.prepend(batch);
                    buffer.iter().cloned().collect()
                };
                if let Err(e) = self.store.persist(&snapshot) {
                    warn!(error = %e, "failed to persist audit buffer");
                }
                FlushOutcome::Requeued(snapshot.len())
            },
        }
    }
}

/// Cheap cloneable handle for the synchronous enqueue path.
#[derive(Clone)]
pub struct AuditHandle {
    shared: Arc<PipelineShared>,
}

impl AuditHandle {
    /// Enqueue one event. Non-blocking; a saturated buffer drops oldest.
    ///
    /// The pipeline stamps identity, timestamp, and sequence, strips
    /// metadata below audit level `full`, and does nothing at level `off`.
    pub fn enqueue(&self, draft: EventDraft) {
        self.shared.enqueue(draft);
    }
}

impl std::fmt::Debug for AuditHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditHandle").finish_non_exhaustive()
    }
}

/// Buffered, durable, batched shipper of audit events.
pub struct AuditPipeline {
    shared: Arc<PipelineShared>,
    flush_interval: Duration,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AuditPipeline {
    /// Create a pipeline, recovering any events persisted by a previous
    /// process.
    #[must_use]
    pub fn new(
        config: &GovernanceConfig,
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        store: DurableAuditBuffer,
        client: Option<Arc<ControlPlaneClient>>,
        access_token: SecretString,
        audit_level: AuditLevel,
    ) -> Self {
        let mut buffer = BoundedBuffer::new(config.max_audit_buffer_size);
        let recovered = store.load();
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered audit events from disk");
            for event in recovered {
                buffer.push(event);
            }
        }

        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(PipelineShared {
                buffer: Mutex::new(buffer),
                store,
                client,
                user_id: user_id.into(),
                org_id: org_id.into(),
                audit_level: RwLock::new(audit_level),
                access_token: RwLock::new(access_token),
                batch_size: config.audit_batch_size,
                flush_signal: Notify::new(),
            }),
            flush_interval: config.audit_flush_interval,
            stop,
            task: Mutex::new(None),
        }
    }

    /// Handle for the synchronous enqueue path.
    #[must_use]
    pub fn handle(&self) -> AuditHandle {
        AuditHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of currently buffered events.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawn the periodic flush task. Must be called on a tokio runtime.
    /// Calling it twice is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.flush_interval;
        let mut stop_rx = self.stop.subscribe();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = shared.flush_signal.notified() => {
                        shared.flush().await;
                    },
                    () = tokio::time::sleep(interval) => {
                        shared.flush().await;
                    },
                }
            }
            // Final flush: a clean shutdown loses nothing that fit in the
            // buffer.
            shared.flush().await;
        }));
    }

    /// Stop the flush task, running one final flush.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let task = {
            let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        // Covers a pipeline that was never started, and anything enqueued
        // after the task's own final flush. An empty flush is free.
        self.shared.flush().await;
    }

    /// Ship (or persist) everything buffered right now.
    pub async fn flush(&self) -> FlushOutcome {
        self.shared.flush().await
    }

    /// Swap the bearer token after a session rotation.
    pub fn update_access_token(&self, token: SecretString) {
        *self
            .shared
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Change the audit verbosity after a policy update.
    pub fn update_audit_level(&self, level: AuditLevel) {
        let previous = {
            let mut guard = self
                .shared
                .audit_level
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, level)
        };
        if previous != level {
            info!(%level, "audit level changed");
        }
    }
}

impl std::fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditPipeline")
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}
