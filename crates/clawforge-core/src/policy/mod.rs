//! Organization policy model.
//!
//! An [`OrgPolicy`] is the authoritative rule set for one organization at one
//! version. Policies are fetched out of band by the host's policy client and
//! pushed into the engine; this module only models and evaluates them.
//!
//! Tool rules are expressed as [`ToolSelector`]s: either a concrete tool name
//! or a `group:<id>` reference that expands through the closed group table in
//! [`names`].

pub mod engine;
pub mod names;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much detail is recorded per audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Record nothing.
    Off,
    /// Record events without payload metadata.
    #[default]
    Metadata,
    /// Record events with full metadata.
    Full,
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Metadata => write!(f, "metadata"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// A single tool rule entry: a concrete tool name or a `group:<id>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSelector(String);

impl ToolSelector {
    /// Create a selector from a raw string.
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self(selector.into())
    }

    /// Get the selector as a string reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the group ID if this selector is a `group:<id>` reference.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.0.trim().strip_prefix(names::GROUP_PREFIX)
    }
}

impl std::fmt::Display for ToolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ToolSelector {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ToolSelector {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Allow and deny rules for tool invocations.
///
/// An empty allow list means "allow anything not explicitly denied"; an
/// empty deny list is a no-op. Deny always beats allow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRules {
    /// Tools (or groups) that may be invoked. Empty means unrestricted.
    #[serde(default)]
    pub allow: Vec<ToolSelector>,

    /// Tools (or groups) that must not be invoked.
    #[serde(default)]
    pub deny: Vec<ToolSelector>,
}

/// The authoritative rule set for one organization at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgPolicy {
    /// Policy version, monotone per organization.
    pub version: u64,

    /// Tool allow/deny rules.
    #[serde(default)]
    pub tools: ToolRules,

    /// Audit verbosity mandated by this policy.
    #[serde(default)]
    pub audit_level: AuditLevel,

    /// When this policy was fetched from the control plane.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl OrgPolicy {
    /// Create a policy fetched just now.
    #[must_use]
    pub fn new(version: u64, tools: ToolRules) -> Self {
        Self {
            version,
            tools,
            audit_level: AuditLevel::default(),
            fetched_at: Utc::now(),
        }
    }

    /// Set the audit level.
    #[must_use]
    pub const fn with_audit_level(mut self, level: AuditLevel) -> Self {
        self.audit_level = level;
        self
    }

    /// Age of the cached policy in milliseconds.
    #[must_use]
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_group_id() {
        assert_eq!(ToolSelector::from("group:fs").group_id(), Some("fs"));
        assert_eq!(ToolSelector::from(" group:web ").group_id(), Some("web"));
        assert_eq!(ToolSelector::from("exec").group_id(), None);
    }

    #[test]
    fn test_policy_wire_format() {
        let policy: OrgPolicy = serde_json::from_str(
            r#"{
                "version": 4,
                "tools": { "allow": ["group:fs"], "deny": ["exec"] },
                "auditLevel": "full"
            }"#,
        )
        .unwrap();

        assert_eq!(policy.version, 4);
        assert_eq!(policy.audit_level, AuditLevel::Full);
        assert_eq!(policy.tools.allow, vec![ToolSelector::from("group:fs")]);
        assert_eq!(policy.tools.deny, vec![ToolSelector::from("exec")]);
    }

    #[test]
    fn test_policy_defaults_metadata_level_and_open_rules() {
        let policy: OrgPolicy = serde_json::from_str(r#"{ "version": 1 }"#).unwrap();
        assert_eq!(policy.audit_level, AuditLevel::Metadata);
        assert!(policy.tools.allow.is_empty());
        assert!(policy.tools.deny.is_empty());
    }
}
