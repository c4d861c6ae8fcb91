//! Control-plane reachability tracking.
//!
//! [`ConnectionFsm`] is a pure state machine over heartbeat outcomes. It
//! performs no I/O; the heartbeat task feeds it results and consumes the
//! [`Transition`] records it emits. A transition is emitted only when the
//! state actually changes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reachability state of the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Heartbeats are succeeding.
    Connected,
    /// Some heartbeats failed, below the offline threshold.
    Degraded,
    /// Consecutive failures reached the threshold.
    Offline,
    /// The control plane rejected our credentials.
    Unauthenticated,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
            Self::Offline => write!(f, "offline"),
            Self::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// A state change emitted by the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: ConnectionState,
    /// State after the change.
    pub to: ConnectionState,
    /// Failure count at the moment of the change.
    pub consecutive_failures: u32,
}

/// Snapshot of connection health for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Current reachability state.
    pub state: ConnectionState,
    /// When the last heartbeat succeeded, if any did.
    pub last_successful_heartbeat: Option<DateTime<Utc>>,
    /// Current consecutive failure count.
    pub consecutive_failures: u32,
    /// Age of the cached policy in milliseconds, when one is loaded.
    pub cached_policy_age_ms: Option<i64>,
}

/// Pure state machine over heartbeat outcomes.
///
/// Constructed only after a successful authentication and policy fetch, so
/// the initial state is [`ConnectionState::Connected`].
#[derive(Debug)]
pub struct ConnectionFsm {
    state: ConnectionState,
    consecutive_failures: u32,
    failure_threshold: u32,
    last_successful_heartbeat: Option<DateTime<Utc>>,
}

impl ConnectionFsm {
    /// Create a new FSM with the given offline threshold.
    ///
    /// A threshold of zero is treated as one: a single failure flips to
    /// offline.
    #[must_use]
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: ConnectionState::Connected,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            last_successful_heartbeat: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current consecutive failure count.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a successful heartbeat.
    ///
    /// Resets the failure count, stamps the success time, and moves to
    /// `Connected` from any state.
    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.last_successful_heartbeat = Some(Utc::now());
        self.transition_to(ConnectionState::Connected)
    }

    /// Record a failed heartbeat.
    ///
    /// Below the threshold a connected FSM degrades; at the threshold any
    /// state moves to `Offline`.
    pub fn record_failure(&mut self) -> Option<Transition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= self.failure_threshold {
            self.transition_to(ConnectionState::Offline)
        } else if self.state == ConnectionState::Connected {
            self.transition_to(ConnectionState::Degraded)
        } else {
            None
        }
    }

    /// Record an explicit authentication rejection from the control plane.
    pub fn set_unauthenticated(&mut self) -> Option<Transition> {
        self.transition_to(ConnectionState::Unauthenticated)
    }

    /// Current status snapshot. The policy age is stitched in by the caller,
    /// which owns the policy cache.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            last_successful_heartbeat: self.last_successful_heartbeat,
            consecutive_failures: self.consecutive_failures,
            cached_policy_age_ms: None,
        }
    }

    fn transition_to(&mut self, to: ConnectionState) -> Option<Transition> {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        Some(Transition {
            from,
            to,
            consecutive_failures: self.consecutive_failures,
        })
    }
}
