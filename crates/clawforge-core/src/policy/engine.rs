//! Synchronous tool-call authorization.
//!
//! [`evaluate`] is the decision core of the enforcement hot path. It is a
//! pure function over a consistent snapshot of `(policy, kill switch,
//! offline override)` and must stay free of I/O, locks, and panics: the host
//! assistant calls it inline on every tool invocation.
//!
//! Decision order is strict:
//!
//! 1. offline override fast paths (`Allow` bypasses everything, `Cached`
//!    skips the kill-switch check)
//! 2. kill switch
//! 3. deny rules, then allow rules
//!
//! Absent or malformed policy fails open: governance must never brick the
//! assistant.

use super::names;
use super::OrgPolicy;
use crate::audit::EventOutcome;

/// Block message when the kill switch is active without an operator message.
pub const KILL_SWITCH_DEFAULT_MESSAGE: &str = "tool calls are disabled by your organization";

/// Block message for a deny-rule match.
pub const DENY_LIST_MESSAGE: &str = "tool is blocked by org policy";

/// Block message for a miss against a non-empty allow list.
pub const NOT_IN_ALLOW_LIST_MESSAGE: &str = "tool is not in allowed list";

/// Organization-wide kill switch, mirrored from the heartbeat response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillSwitchState {
    /// When `true`, all tool calls are denied regardless of policy.
    pub active: bool,
    /// Operator-supplied message shown to the blocked user.
    pub message: Option<String>,
}

impl KillSwitchState {
    /// An active kill switch with an optional operator message.
    #[must_use]
    pub fn engaged(message: Option<String>) -> Self {
        Self {
            active: true,
            message,
        }
    }

    /// The message to surface when blocking.
    #[must_use]
    pub fn block_message(&self) -> &str {
        self.message.as_deref().unwrap_or(KILL_SWITCH_DEFAULT_MESSAGE)
    }
}

/// Local enforcement override driven by heartbeat failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OfflineOverride {
    /// No override; normal enforcement.
    #[default]
    None,
    /// Bypass all checks.
    Allow,
    /// Evaluate against the cached policy, skipping the kill-switch check.
    Cached,
}

impl std::fmt::Display for OfflineOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Allow => write!(f, "allow"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

/// The outcome of a single authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The tool call may proceed.
    Allow,
    /// The tool call is blocked; the string is a user-facing reason.
    Block(String),
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Which rule produced a decision. Recorded on the audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Offline override `Allow` bypassed all checks.
    OfflineAllowMode,
    /// The kill switch is active.
    KillSwitch,
    /// The tool matched a deny rule.
    DenyList,
    /// A non-empty allow list did not contain the tool.
    NotInAllowList,
    /// The tool matched the allow list.
    AllowList,
    /// Empty allow list; nothing denied the tool.
    DefaultAllow,
    /// No policy loaded; fail open.
    NoPolicy,
}

impl DecisionReason {
    /// Stable snake_case tag used in audit events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OfflineAllowMode => "offline_allow_mode",
            Self::KillSwitch => "kill_switch",
            Self::DenyList => "deny_list",
            Self::NotInAllowList => "not_in_allow_list",
            Self::AllowList => "allow_list",
            Self::DefaultAllow => "default_allow",
            Self::NoPolicy => "no_policy",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decision together with the normalized tool name and the rule that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// The normalized tool name that was evaluated.
    pub tool_name: String,
    /// Allow or block.
    pub decision: Decision,
    /// The rule that produced the decision.
    pub reason: DecisionReason,
}

impl Verdict {
    /// The audit outcome matching this verdict.
    #[must_use]
    pub const fn outcome(&self) -> EventOutcome {
        match self.decision {
            Decision::Allow => EventOutcome::Allowed,
            Decision::Block(_) => EventOutcome::Blocked,
        }
    }
}

/// Authorize one tool invocation against a consistent enforcement snapshot.
#[must_use]
pub fn evaluate(
    policy: Option<&OrgPolicy>,
    kill_switch: &KillSwitchState,
    offline_override: OfflineOverride,
    raw_tool_name: &str,
) -> Verdict {
    let tool_name = names::normalize(raw_tool_name);

    match offline_override {
        OfflineOverride::Allow => Verdict {
            tool_name,
            decision: Decision::Allow,
            reason: DecisionReason::OfflineAllowMode,
        },
        OfflineOverride::Cached => evaluate_policy(policy, tool_name),
        OfflineOverride::None => {
            if kill_switch.active {
                return Verdict {
                    tool_name,
                    decision: Decision::Block(kill_switch.block_message().to_string()),
                    reason: DecisionReason::KillSwitch,
                };
            }
            evaluate_policy(policy, tool_name)
        },
    }
}

/// Evaluate the allow/deny rules for an already-normalized tool name.
fn evaluate_policy(policy: Option<&OrgPolicy>, tool_name: String) -> Verdict {
    let Some(policy) = policy else {
        return Verdict {
            tool_name,
            decision: Decision::Allow,
            reason: DecisionReason::NoPolicy,
        };
    };

    let denied = names::expand(&policy.tools.deny);
    if denied.contains(&tool_name) {
        return Verdict {
            tool_name,
            decision: Decision::Block(DENY_LIST_MESSAGE.to_string()),
            reason: DecisionReason::DenyList,
        };
    }

    if policy.tools.allow.is_empty() {
        return Verdict {
            tool_name,
            decision: Decision::Allow,
            reason: DecisionReason::DefaultAllow,
        };
    }

    let allowed = names::expand(&policy.tools.allow);
    if allowed.contains(&tool_name) {
        Verdict {
            tool_name,
            decision: Decision::Allow,
            reason: DecisionReason::AllowList,
        }
    } else {
        Verdict {
            tool_name,
            decision: Decision::Block(NOT_IN_ALLOW_LIST_MESSAGE.to_string()),
            reason: DecisionReason::NotInAllowList,
        }
    }
}
