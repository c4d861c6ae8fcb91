//! # clawforge-agent
//!
//! The in-process governance runtime embedded in each OpenClaw assistant:
//! synchronous tool-call enforcement, buffered-and-durable audit shipping,
//! a control-plane heartbeat with kill-switch mirroring and predictable
//! offline degradation, and proactive session token refresh.
//!
//! Five components cooperate, built in dependency order (leaves first):
//! connection FSM, audit pipeline, enforcer, heartbeat, session keeper.
//! [`GovernanceEngine`] assembles them once per authenticated session; the
//! host calls [`Enforcer::authorize`] on every tool invocation and the
//! three background tasks run on the host's tokio runtime.
//!
//! ## Example
//!
//! ```rust,no_run
//! use clawforge_agent::{ConfigRoot, GovernanceEngine};
//! use clawforge_core::config::GovernanceConfig;
//! use clawforge_core::session::SessionTokens;
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = SessionTokens {
//!         access_token: SecretString::new("access".to_string()),
//!         refresh_token: Some(SecretString::new("refresh".to_string())),
//!         expires_at_ms: 1_750_000_000_000,
//!         user_id: "user-1".to_string(),
//!         org_id: Some("org-1".to_string()),
//!     };
//!     let root = ConfigRoot::discover().expect("home directory");
//!
//!     let engine = GovernanceEngine::new(
//!         GovernanceConfig::default(),
//!         session,
//!         &root,
//!         None,
//!         None,
//!     )
//!     .expect("engine");
//!     engine.start();
//!
//!     let decision = engine.enforcer().authorize("bash", None, Some("sess-1"));
//!     println!("{decision:?}");
//!
//!     engine.stop().await;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod client;
pub mod enforcer;
mod fs_safe;
pub mod heartbeat;
pub mod paths;
pub mod session_keeper;
pub mod state;

use std::sync::{Arc, Mutex, PoisonError};

use clawforge_core::audit::{EventDraft, EventKind, EventOutcome};
use clawforge_core::config::GovernanceConfig;
use clawforge_core::connection::{ConnectionFsm, ConnectionStatus};
use clawforge_core::policy::{AuditLevel, OrgPolicy};
use clawforge_core::session::SessionTokens;

pub use crate::audit::{AuditHandle, AuditPipeline, DurableAuditBuffer, FlushOutcome};
pub use crate::client::{ClientError, ControlPlaneClient, ExchangeRequest};
pub use crate::enforcer::Enforcer;
pub use crate::heartbeat::{Heartbeat, PolicyRefreshCallback};
pub use crate::paths::ConfigRoot;
pub use crate::session_keeper::{SessionKeeper, SessionStore};
pub use crate::state::EnforcerState;

/// Errors constructing the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Neither the session nor the configuration carries an org ID.
    #[error("no organization ID in session or configuration")]
    MissingOrgId,

    /// The control-plane client could not be constructed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The assembled governance engine for one authenticated session.
///
/// Created after login or enrollment, destroyed on logout or process exit.
/// `start()` spawns the background tasks; the enforcer works (against local
/// state) even before `start()` and after `stop()`.
#[derive(Debug)]
pub struct GovernanceEngine {
    state: Arc<EnforcerState>,
    fsm: Arc<Mutex<ConnectionFsm>>,
    pipeline: Arc<AuditPipeline>,
    enforcer: Enforcer,
    heartbeat: Arc<Heartbeat>,
    session_keeper: Arc<SessionKeeper>,
}

impl GovernanceEngine {
    /// Build the five components and wire their callbacks.
    ///
    /// `initial_policy` seeds the enforcement state when the host already
    /// fetched one during login. `on_policy_refresh_needed` is invoked when
    /// the control plane asks for a refetch; the host's policy client pushes
    /// the result back through [`apply_policy`](Self::apply_policy).
    ///
    /// # Errors
    ///
    /// Fails when no org ID is available or the control-plane client cannot
    /// be constructed.
    pub fn new(
        config: GovernanceConfig,
        session: SessionTokens,
        root: &ConfigRoot,
        initial_policy: Option<OrgPolicy>,
        on_policy_refresh_needed: Option<PolicyRefreshCallback>,
    ) -> Result<Self, EngineError> {
        let org_id = session
            .org_id
            .clone()
            .or_else(|| config.org_id.clone())
            .ok_or(EngineError::MissingOrgId)?;
        let user_id = session.user_id.clone();

        let client = if config.has_control_plane() {
            let url = config.control_plane_url.as_deref().unwrap_or_default();
            Some(Arc::new(ControlPlaneClient::new(url)?))
        } else {
            None
        };

        let audit_level = initial_policy
            .as_ref()
            .map_or_else(AuditLevel::default, |p| p.audit_level);
        let state = Arc::new(match initial_policy {
            Some(policy) => EnforcerState::with_policy(policy),
            None => EnforcerState::new(),
        });
        let fsm = Arc::new(Mutex::new(ConnectionFsm::new(
            config.heartbeat_failure_threshold,
        )));

        let pipeline = Arc::new(AuditPipeline::new(
            &config,
            user_id.clone(),
            org_id.clone(),
            DurableAuditBuffer::new(root.audit_buffer_file()),
            client.clone(),
            session.access_token.clone(),
            audit_level,
        ));

        let enforcer = Enforcer::new(Arc::clone(&state), pipeline.handle());

        let heartbeat = Arc::new(Heartbeat::new(
            &config,
            client.clone(),
            Arc::clone(&state),
            Arc::clone(&fsm),
            pipeline.handle(),
            user_id,
            org_id,
            session.access_token.clone(),
            on_policy_refresh_needed,
        ));

        let mut session_keeper = SessionKeeper::new(
            client,
            SessionStore::new(root.session_file()),
            session,
            Arc::clone(&fsm),
            pipeline.handle(),
        );
        // Token fan-out: one-shot notification per rotation; each consumer
        // updates its own copy under its own lock.
        let pipeline_tokens = Arc::clone(&pipeline);
        session_keeper.add_listener(Box::new(move |tokens| {
            pipeline_tokens.update_access_token(tokens.access_token.clone());
        }));
        let heartbeat_tokens = Arc::clone(&heartbeat);
        session_keeper.add_listener(Box::new(move |tokens| {
            heartbeat_tokens.update_access_token(tokens.access_token.clone());
        }));
        let session_keeper = Arc::new(session_keeper);

        Ok(Self {
            state,
            fsm,
            pipeline,
            enforcer,
            heartbeat,
            session_keeper,
        })
    }

    /// Spawn the three background tasks. Must be called on a tokio runtime.
    pub fn start(&self) {
        self.pipeline.start();
        self.heartbeat.start();
        self.session_keeper.start();
        self.pipeline.handle().enqueue(
            EventDraft::new(EventKind::SessionEvent, EventOutcome::Success)
                .with_reason("governance_started"),
        );
    }

    /// Stop all background tasks; the pipeline runs one final flush.
    pub async fn stop(&self) {
        self.heartbeat.stop().await;
        self.session_keeper.stop().await;
        self.pipeline.handle().enqueue(
            EventDraft::new(EventKind::SessionEvent, EventOutcome::Success)
                .with_reason("governance_stopped"),
        );
        self.pipeline.stop().await;
    }

    /// The synchronous tool-call authorizer.
    #[must_use]
    pub const fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Connection health, with the cached policy age stitched in.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let mut status = self
            .fsm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status();
        status.cached_policy_age_ms = self.state.policy_age_ms();
        status
    }

    /// Install a policy fetched by the host's policy client.
    ///
    /// Stale versions are discarded. Returns `true` when installed; the
    /// pipeline's audit level follows the installed policy.
    pub fn apply_policy(&self, policy: OrgPolicy) -> bool {
        let level = policy.audit_level;
        if self.state.apply_policy(policy) {
            self.pipeline.update_audit_level(level);
            true
        } else {
            false
        }
    }

    /// Mark the session unauthenticated (e.g. the host observed a 401 on a
    /// policy fetch).
    pub fn set_unauthenticated(&self) {
        let transition = {
            let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
            fsm.set_unauthenticated()
        };
        if let Some(t) = transition {
            self.pipeline.handle().enqueue(heartbeat::transition_draft(&t));
        }
    }

    /// The current session tokens.
    #[must_use]
    pub fn session(&self) -> SessionTokens {
        self.session_keeper.session()
    }

    /// Ship (or persist) everything buffered right now.
    pub async fn flush_audit(&self) -> FlushOutcome {
        self.pipeline.flush().await
    }
}

/// Load the session persisted by a previous process, if a valid one exists.
///
/// Lets a restarted host resume its control-plane session without
/// re-login.
#[must_use]
pub fn load_persisted_session(root: &ConfigRoot) -> Option<SessionTokens> {
    SessionStore::new(root.session_file()).load()
}
