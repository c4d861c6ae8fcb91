//! Control-plane heartbeat task.
//!
//! Each tick probes `GET /api/v1/heartbeat/{orgId}/{userId}`, feeds the
//! outcome to the connection FSM, mirrors the kill switch into the
//! enforcement state, and applies the configured offline behavior once
//! consecutive failures reach the threshold. There is no retry within a
//! tick; the next tick is the retry.
//!
//! `stop()` is prompt: the in-flight probe is abandoned, and a generation
//! counter discards any outcome that races the shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use clawforge_core::audit::{EventDraft, EventKind, EventOutcome};
use clawforge_core::config::{GovernanceConfig, OfflineMode};
use clawforge_core::connection::{ConnectionFsm, ConnectionState, Transition};
use clawforge_core::policy::engine::OfflineOverride;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditHandle;
use crate::client::{ClientError, ControlPlaneClient, HeartbeatResponse};
use crate::state::{EnforcerState, KillSwitchEdge};

/// Kill-switch message used when offline block mode engages.
pub const OFFLINE_BLOCK_MESSAGE: &str = "cannot reach control plane";

/// Callback invoked when the control plane asks for a policy refetch. The
/// policy client lives outside the engine; it fetches the new policy out of
/// band and pushes it back through `GovernanceEngine::apply_policy`.
pub type PolicyRefreshCallback = Box<dyn Fn() + Send + Sync>;

/// Periodic control-plane probe.
pub struct Heartbeat {
    interval: Duration,
    offline_mode: OfflineMode,
    client: Option<Arc<ControlPlaneClient>>,
    state: Arc<EnforcerState>,
    fsm: Arc<Mutex<ConnectionFsm>>,
    audit: AuditHandle,
    org_id: String,
    user_id: String,
    access_token: RwLock<SecretString>,
    on_policy_refresh_needed: Option<PolicyRefreshCallback>,
    generation: AtomicU64,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    /// Create the heartbeat. Inactive when no client is configured.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &GovernanceConfig,
        client: Option<Arc<ControlPlaneClient>>,
        state: Arc<EnforcerState>,
        fsm: Arc<Mutex<ConnectionFsm>>,
        audit: AuditHandle,
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        access_token: SecretString,
        on_policy_refresh_needed: Option<PolicyRefreshCallback>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            interval: config.heartbeat_interval,
            offline_mode: config.offline_mode,
            client,
            state,
            fsm,
            audit,
            org_id: org_id.into(),
            user_id: user_id.into(),
            access_token: RwLock::new(access_token),
            on_policy_refresh_needed,
            generation: AtomicU64::new(0),
            stop,
            task: Mutex::new(None),
        }
    }

    /// Spawn the probe task. Must be called on a tokio runtime; a second
    /// call is a no-op, as is starting without a configured control plane.
    pub fn start(self: &Arc<Self>) {
        let Some(client) = self.client.clone() else {
            debug!("no control plane configured; heartbeat inactive");
            return;
        };

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let generation = self.generation.load(Ordering::SeqCst);
        let mut stop_rx = self.stop.subscribe();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    halt = this.tick(&client, generation) => {
                        if halt {
                            break;
                        }
                    },
                }
            }
        }));
    }

    /// Stop the probe task promptly, discarding any in-flight outcome.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.stop.send(true);
        let task = {
            let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Swap the bearer token after a session rotation.
    pub fn update_access_token(&self, token: SecretString) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// One sleep-then-probe cycle. Returns `true` when the task must halt
    /// (explicit credential rejection).
    async fn tick(&self, client: &ControlPlaneClient, generation: u64) -> bool {
        tokio::time::sleep(self.interval).await;

        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outcome = client.heartbeat(&self.org_id, &self.user_id, &token).await;

        // A stop() that raced this probe bumped the generation; the outcome
        // is stale and must not touch enforcement state.
        if self.generation.load(Ordering::SeqCst) != generation {
            return true;
        }

        match outcome {
            Ok(response) => {
                self.apply_success(&response);
                false
            },
            Err(e) if e.is_unauthorized() => {
                self.apply_unauthorized();
                true
            },
            Err(e) => {
                self.apply_failure(&e);
                false
            },
        }
    }

    /// Apply a successful heartbeat response.
    ///
    /// Public so outcome application stays separate from transport: the
    /// probe task calls this, and tests drive it directly.
    pub fn apply_success(&self, response: &HeartbeatResponse) {
        let transition = {
            let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
            fsm.record_success()
        };
        if let Some(t) = transition {
            info!(from = %t.from, to = %t.to, "control plane reachable");
            self.audit.enqueue(transition_draft(&t));
        }

        if self.state.set_offline_override(OfflineOverride::None) {
            info!("connection restored; offline override cleared");
        }

        let message = response.kill_switch_message.clone();
        match self.state.set_kill_switch(response.kill_switch, message.clone()) {
            Some(KillSwitchEdge::Activated) => {
                warn!(
                    message = message.as_deref().unwrap_or_default(),
                    "kill switch activated by control plane"
                );
                self.audit.enqueue(kill_switch_draft(true, message));
            },
            Some(KillSwitchEdge::Deactivated) => {
                info!("kill switch deactivated by control plane");
                self.audit.enqueue(kill_switch_draft(false, None));
            },
            None => {},
        }

        if response.refresh_policy_now {
            if let Some(callback) = &self.on_policy_refresh_needed {
                debug!(
                    policy_version = response.policy_version,
                    "control plane requested policy refresh"
                );
                callback();
            }
        }
    }

    /// Apply a failed heartbeat and, at the threshold, the offline behavior.
    pub fn apply_failure(&self, error: &ClientError) {
        let (transition, offline, failures) = {
            let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
            let transition = fsm.record_failure();
            (
                transition,
                fsm.state() == ConnectionState::Offline,
                fsm.consecutive_failures(),
            )
        };

        warn!(error = %error, consecutive_failures = failures, "heartbeat failed");
        if let Some(t) = transition {
            self.audit.enqueue(transition_draft(&t));
        }

        if offline {
            self.apply_offline_behavior();
        }
    }

    fn apply_offline_behavior(&self) {
        match self.offline_mode {
            OfflineMode::Block => {
                self.state.set_offline_override(OfflineOverride::None);
                if self
                    .state
                    .set_kill_switch(true, Some(OFFLINE_BLOCK_MESSAGE.to_string()))
                    == Some(KillSwitchEdge::Activated)
                {
                    warn!("control plane unreachable; blocking all tool calls");
                    self.audit
                        .enqueue(kill_switch_draft(true, Some(OFFLINE_BLOCK_MESSAGE.to_string())));
                }
            },
            OfflineMode::Allow => {
                if self.state.set_offline_override(OfflineOverride::Allow) {
                    warn!("control plane unreachable; allowing all tool calls");
                }
            },
            OfflineMode::Cached => {
                if self.state.set_offline_override(OfflineOverride::Cached) {
                    warn!("control plane unreachable; enforcing cached policy");
                }
            },
        }
    }

    /// Apply an explicit credential rejection. The task halts afterwards;
    /// only a re-login constructs a new engine.
    pub fn apply_unauthorized(&self) {
        error!("control plane rejected credentials; heartbeat halted until re-login");
        let transition = {
            let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
            fsm.set_unauthenticated()
        };
        if let Some(t) = transition {
            self.audit.enqueue(transition_draft(&t));
        }
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("interval", &self.interval)
            .field("offline_mode", &self.offline_mode)
            .finish_non_exhaustive()
    }
}

/// Audit event for a connection-state transition.
///
/// `kill_switch_activated` is the legacy wire name for all governance
/// transitions; `metadata.kind` discriminates connection-state changes from
/// actual kill-switch edges.
pub(crate) fn transition_draft(transition: &Transition) -> EventDraft {
    let outcome = if transition.to == ConnectionState::Connected {
        EventOutcome::Success
    } else {
        EventOutcome::Error
    };

    EventDraft::new(EventKind::KillSwitchActivated, outcome)
        .with_reason("connection_state_change")
        .with_metadata("kind", json!("connection_state"))
        .with_metadata("transitionType", json!("connection_state_change"))
        .with_metadata("from", json!(transition.from.to_string()))
        .with_metadata("to", json!(transition.to.to_string()))
        .with_metadata("consecutiveFailures", json!(transition.consecutive_failures))
}

/// Audit event for a kill-switch edge.
pub(crate) fn kill_switch_draft(active: bool, message: Option<String>) -> EventDraft {
    let (outcome, reason) = if active {
        (EventOutcome::Error, "kill_switch_activated")
    } else {
        (EventOutcome::Success, "kill_switch_deactivated")
    };

    let mut draft = EventDraft::new(EventKind::KillSwitchActivated, outcome)
        .with_reason(reason)
        .with_metadata("kind", json!("kill_switch"));
    if let Some(message) = message {
        draft = draft.with_metadata("message", json!(message));
    }
    draft
}
