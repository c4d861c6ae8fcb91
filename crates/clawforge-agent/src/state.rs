//! Shared enforcement state.
//!
//! One immutable [`EnforcerSnapshot`] behind a short-held lock. The hot path
//! clones the `Arc` and evaluates against a consistent view; background
//! writers (heartbeat, policy refresh) clone-modify-swap. No lock is ever
//! held across I/O.

use std::sync::{Arc, PoisonError, RwLock};

use clawforge_core::policy::engine::{KillSwitchState, OfflineOverride};
use clawforge_core::policy::{AuditLevel, OrgPolicy};
use tracing::{info, warn};

/// A consistent view of `(policy, kill switch, offline override)`.
#[derive(Debug, Clone, Default)]
pub struct EnforcerSnapshot {
    /// The cached org policy, when one has been fetched.
    pub policy: Option<OrgPolicy>,
    /// Kill switch mirrored from the control plane (or engaged locally in
    /// offline block mode).
    pub kill_switch: KillSwitchState,
    /// Heartbeat-driven enforcement override.
    pub offline_override: OfflineOverride,
}

/// A kill-switch edge observed while mirroring heartbeat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSwitchEdge {
    /// The switch went from inactive to active.
    Activated,
    /// The switch went from active to inactive.
    Deactivated,
}

/// Shared, atomically-swapped enforcement state.
#[derive(Debug, Default)]
pub struct EnforcerState {
    snapshot: RwLock<Arc<EnforcerSnapshot>>,
}

impl EnforcerState {
    /// Create state with no policy loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create state seeded with an already-fetched policy.
    #[must_use]
    pub fn with_policy(policy: OrgPolicy) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(EnforcerSnapshot {
                policy: Some(policy),
                ..EnforcerSnapshot::default()
            })),
        }
    }

    /// The current snapshot. Cheap: one short read lock and an `Arc` clone.
    #[must_use]
    pub fn load(&self) -> Arc<EnforcerSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Install a fetched policy.
    ///
    /// Policy versions are monotone per org: a policy older than the cached
    /// one is discarded. Returns `true` when the policy was installed.
    pub fn apply_policy(&self, policy: OrgPolicy) -> bool {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = &guard.policy {
            if policy.version < current.version {
                warn!(
                    cached_version = current.version,
                    incoming_version = policy.version,
                    "discarding stale policy"
                );
                return false;
            }
        }

        info!(version = policy.version, "policy installed");
        let mut next = (**guard).clone();
        next.policy = Some(policy);
        *guard = Arc::new(next);
        true
    }

    /// Mirror the kill switch reported by the control plane.
    ///
    /// Returns the edge when the active flag changed; steady state returns
    /// `None` so callers log edges only.
    pub fn set_kill_switch(&self, active: bool, message: Option<String>) -> Option<KillSwitchEdge> {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let edge = match (guard.kill_switch.active, active) {
            (false, true) => Some(KillSwitchEdge::Activated),
            (true, false) => Some(KillSwitchEdge::Deactivated),
            _ => None,
        };

        if edge.is_some() || guard.kill_switch.message.as_deref() != message.as_deref() {
            let mut next = (**guard).clone();
            next.kill_switch = KillSwitchState { active, message };
            *guard = Arc::new(next);
        }
        edge
    }

    /// Set the offline override. Returns `true` when it changed.
    pub fn set_offline_override(&self, offline_override: OfflineOverride) -> bool {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if guard.offline_override == offline_override {
            return false;
        }
        let mut next = (**guard).clone();
        next.offline_override = offline_override;
        *guard = Arc::new(next);
        true
    }

    /// The current offline override.
    #[must_use]
    pub fn offline_override(&self) -> OfflineOverride {
        self.load().offline_override
    }

    /// The audit level mandated by the cached policy, or the default when
    /// no policy is loaded.
    #[must_use]
    pub fn audit_level(&self) -> AuditLevel {
        self.load()
            .policy
            .as_ref()
            .map_or_else(AuditLevel::default, |p| p.audit_level)
    }

    /// Age of the cached policy in milliseconds, when one is loaded.
    #[must_use]
    pub fn policy_age_ms(&self) -> Option<i64> {
        self.load().policy.as_ref().map(OrgPolicy::age_ms)
    }
}

#[cfg(test)]
mod tests {
    use clawforge_core::policy::ToolRules;

    use super::*;

    #[test]
    fn test_policy_version_is_monotone() {
        let state = EnforcerState::with_policy(OrgPolicy::new(5, ToolRules::default()));

        assert!(!state.apply_policy(OrgPolicy::new(4, ToolRules::default())));
        assert_eq!(state.load().policy.as_ref().unwrap().version, 5);

        // Same version re-applies (refresh), newer replaces.
        assert!(state.apply_policy(OrgPolicy::new(5, ToolRules::default())));
        assert!(state.apply_policy(OrgPolicy::new(6, ToolRules::default())));
        assert_eq!(state.load().policy.as_ref().unwrap().version, 6);
    }

    #[test]
    fn test_kill_switch_edges() {
        let state = EnforcerState::new();

        assert_eq!(
            state.set_kill_switch(true, Some("freeze".to_string())),
            Some(KillSwitchEdge::Activated)
        );
        // Steady state: no edge.
        assert_eq!(state.set_kill_switch(true, Some("freeze".to_string())), None);
        assert_eq!(
            state.set_kill_switch(false, None),
            Some(KillSwitchEdge::Deactivated)
        );
        assert_eq!(state.set_kill_switch(false, None), None);
    }

    #[test]
    fn test_snapshot_is_consistent_across_writes() {
        let state = EnforcerState::new();
        let before = state.load();

        state.set_kill_switch(true, None);
        state.set_offline_override(OfflineOverride::Cached);

        // The old snapshot is untouched; a fresh load sees both writes.
        assert!(!before.kill_switch.active);
        let after = state.load();
        assert!(after.kill_switch.active);
        assert_eq!(after.offline_override, OfflineOverride::Cached);
    }

    #[test]
    fn test_offline_override_change_detection() {
        let state = EnforcerState::new();
        assert!(state.set_offline_override(OfflineOverride::Allow));
        assert!(!state.set_offline_override(OfflineOverride::Allow));
        assert!(state.set_offline_override(OfflineOverride::None));
    }
}
