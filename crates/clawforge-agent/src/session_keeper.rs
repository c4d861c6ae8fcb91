//! Proactive session token refresh.
//!
//! A background task checks token expiry once a minute and refreshes through
//! the control plane's exchange endpoint when expiry is within five minutes.
//! Each refresh opportunity gets up to three attempts with exponential
//! backoff; total failure is logged and left for the next check. Only an
//! explicit credential rejection flips the engine to unauthenticated.
//!
//! On rotation the new tokens are persisted to `session.json` (owner-only,
//! whole-file overwrite, since the refresh token rotates), the in-memory
//! session is swapped, and every registered listener receives the new
//! tokens so downstream components update their own copies under their own
//! locks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use clawforge_core::audit::{EventDraft, EventKind, EventOutcome};
use clawforge_core::connection::ConnectionFsm;
use clawforge_core::session::SessionTokens;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditHandle;
use crate::client::{ControlPlaneClient, ExchangeRequest};
use crate::fs_safe::{write_private_atomic, FsError};
use crate::heartbeat::transition_draft;

/// How often expiry is checked.
pub const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Refresh when expiry is within this window.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Attempts per refresh opportunity.
pub const REFRESH_ATTEMPTS: u32 = 3;

/// Callback invoked with the new tokens after each rotation.
pub type TokenRotationCallback = Box<dyn Fn(&SessionTokens) + Send + Sync>;

/// Backoff before retrying a failed refresh attempt: 5 s, 10 s, 20 s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(5 << (attempt.saturating_sub(1)).min(2))
}

/// On-disk form of [`SessionTokens`]. Secrets are serialized explicitly and
/// only here; the file itself is mode 0600.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    expires_at: i64,
    user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    org_id: Option<String>,
}

impl PersistedSession {
    fn from_tokens(tokens: &SessionTokens) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().clone(),
            refresh_token: tokens
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().clone()),
            expires_at: tokens.expires_at_ms,
            user_id: tokens.user_id.clone(),
            org_id: tokens.org_id.clone(),
        }
    }

    fn into_tokens(self) -> SessionTokens {
        SessionTokens {
            access_token: SecretString::new(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::new),
            expires_at_ms: self.expires_at,
            user_id: self.user_id,
            org_id: self.org_id,
        }
    }
}

/// Errors from session persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionPersistError {
    /// Serialization failed.
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),

    /// The file write failed.
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Owner of the `session.json` file.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
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

    /// Read the persisted session, if a valid one exists.
    ///
    /// A missing file is silent; an unreadable or unparseable one is logged
    /// and treated as absent.
    #[must_use]
    pub fn load(&self) -> Option<SessionTokens> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read session file");
                return None;
            },
        };

        match serde_json::from_str::<PersistedSession>(&data) {
            Ok(persisted) => Some(persisted.into_tokens()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "invalid session file; ignoring");
                None
            },
        }
    }

    /// Overwrite the persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or the write fails.
    pub fn save(&self, tokens: &SessionTokens) -> Result<(), SessionPersistError> {
        let data = serde_json::to_string_pretty(&PersistedSession::from_tokens(tokens))?;
        write_private_atomic(&self.path, data.as_bytes())?;
        Ok(())
    }
}

/// Background task that keeps the access token fresh.
pub struct SessionKeeper {
    client: Option<Arc<ControlPlaneClient>>,
    store: SessionStore,
    session: RwLock<SessionTokens>,
    check_interval: Duration,
    refresh_window: Duration,
    refreshing: AtomicBool,
    listeners: Vec<TokenRotationCallback>,
    fsm: Arc<Mutex<ConnectionFsm>>,
    audit: AuditHandle,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionKeeper {
    /// Create the keeper. Inactive when no client is configured or the
    /// session carries no refresh token.
    #[must_use]
    pub fn new(
        client: Option<Arc<ControlPlaneClient>>,
        store: SessionStore,
        session: SessionTokens,
        fsm: Arc<Mutex<ConnectionFsm>>,
        audit: AuditHandle,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            client,
            store,
            session: RwLock::new(session),
            check_interval: SESSION_CHECK_INTERVAL,
            refresh_window: REFRESH_WINDOW,
            refreshing: AtomicBool::new(false),
            listeners: Vec::new(),
            fsm,
            audit,
            stop,
            task: Mutex::new(None),
        }
    }

    /// Register a rotation listener. Listeners are fixed before `start`.
    pub fn add_listener(&mut self, listener: TokenRotationCallback) {
        self.listeners.push(listener);
    }

    /// The current session tokens.
    #[must_use]
    pub fn session(&self) -> SessionTokens {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn the expiry check task. Must be called on a tokio runtime; a
    /// second call is a no-op, as is starting without a control plane or
    /// refresh token.
    pub fn start(self: &Arc<Self>) {
        let Some(client) = self.client.clone() else {
            debug!("no control plane configured; session keeper inactive");
            return;
        };
        if !self.session().can_refresh() {
            debug!("session has no refresh token; session keeper inactive");
            return;
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    () = this.tick(&client) => {},
                }
            }
        }));
    }

    /// Stop the expiry check task.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let task = {
            let mut guard = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// One sleep-then-check cycle.
    async fn tick(&self, client: &ControlPlaneClient) {
        tokio::time::sleep(self.check_interval).await;

        if !self.should_refresh() {
            return;
        }

        // Re-entrancy guard: a tick that lands while a (backed-off) refresh
        // is still running is ignored.
        if self.refreshing.swap(true, Ordering::SeqCst) {
            debug!("session refresh already in progress");
            return;
        }
        self.refresh_with_retry(client).await;
        self.refreshing.store(false, Ordering::SeqCst);
    }

    fn should_refresh(&self) -> bool {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        session.can_refresh() && session.expires_within(self.refresh_window)
    }

    async fn refresh_with_retry(&self, client: &ControlPlaneClient) {
        for attempt in 1..=REFRESH_ATTEMPTS {
            match self.refresh_once(client).await {
                Ok(new_session) => {
                    self.apply_rotation(new_session);
                    return;
                },
                Err(e) if e.is_unauthorized() => {
                    error!("control plane rejected refresh token; re-login required");
                    let transition = {
                        let mut fsm = self.fsm.lock().unwrap_or_else(PoisonError::into_inner);
                        fsm.set_unauthenticated()
                    };
                    if let Some(t) = transition {
                        self.audit.enqueue(transition_draft(&t));
                    }
                    return;
                },
                Err(e) => {
                    warn!(attempt, error = %e, "session refresh attempt failed");
                    if attempt < REFRESH_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                },
            }
        }
        error!(
            attempts = REFRESH_ATTEMPTS,
            "session refresh failed; will retry at the next check"
        );
    }

    async fn refresh_once(
        &self,
        client: &ControlPlaneClient,
    ) -> Result<SessionTokens, crate::client::ClientError> {
        let refresh_token = {
            let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
            session
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().clone())
        };
        let Some(refresh_token) = refresh_token else {
            return Err(crate::client::ClientError::Configuration(
                "session has no refresh token".to_string(),
            ));
        };

        let response = client
            .exchange(&ExchangeRequest::refresh_token(refresh_token))
            .await?;
        let mut new_session = response.into_session_tokens();

        // The exchange response may omit identity or the (unrotated)
        // refresh token; carry the current values forward.
        {
            let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
            if new_session.org_id.is_none() {
                new_session.org_id = session.org_id.clone();
            }
            if new_session.refresh_token.is_none() {
                new_session.refresh_token = session.refresh_token.clone();
            }
        }
        Ok(new_session)
    }

    /// Install rotated tokens: persist, swap, fan out.
    ///
    /// Expiry must strictly increase across rotations; a non-increasing
    /// expiry keeps the current session. Returns `true` when installed.
    fn apply_rotation(&self, new_session: SessionTokens) -> bool {
        {
            let current = self.session.read().unwrap_or_else(PoisonError::into_inner);
            if new_session.expires_at_ms <= current.expires_at_ms {
                warn!(
                    current_expiry = current.expires_at_ms,
                    new_expiry = new_session.expires_at_ms,
                    "refresh returned non-increasing expiry; keeping current session"
                );
                return false;
            }
        }

        if let Err(e) = self.store.save(&new_session) {
            warn!(error = %e, "failed to persist session; continuing in memory");
        }

        *self.session.write().unwrap_or_else(PoisonError::into_inner) = new_session.clone();

        for listener in &self.listeners {
            listener(&new_session);
        }

        self.audit.enqueue(
            EventDraft::new(EventKind::SessionEvent, EventOutcome::Success)
                .with_reason("token_refreshed"),
        );
        info!(expires_at = new_session.expires_at_ms, "session tokens rotated");
        true
    }
}

impl std::fmt::Debug for SessionKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeeper")
            .field("check_interval", &self.check_interval)
            .field("refresh_window", &self.refresh_window)
            .finish_non_exhaustive()
    }
}
