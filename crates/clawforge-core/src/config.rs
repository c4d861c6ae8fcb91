//! Governance engine configuration.
//!
//! All knobs the host assistant can set when constructing the engine. Every
//! field has a serde default so a partial (or empty) config document is
//! valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the governance engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Base URL of the control plane. When absent the heartbeat and session
    /// refresh tasks are inactive and audit events are persisted to disk
    /// only.
    #[serde(default)]
    pub control_plane_url: Option<String>,

    /// Default organization ID, used when the session does not carry one.
    #[serde(default)]
    pub org_id: Option<String>,

    /// Interval between heartbeat probes.
    #[serde(default = "default_heartbeat_interval")]
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// Consecutive heartbeat failures before offline behavior applies.
    #[serde(default = "default_heartbeat_failure_threshold")]
    pub heartbeat_failure_threshold: u32,

    /// What enforcement does once the control plane is unreachable.
    #[serde(default)]
    pub offline_mode: OfflineMode,

    /// Buffer length that triggers an audit flush.
    #[serde(default = "default_audit_batch_size")]
    pub audit_batch_size: usize,

    /// Interval between periodic audit flushes.
    #[serde(default = "default_audit_flush_interval")]
    #[serde(with = "humantime_serde")]
    pub audit_flush_interval: Duration,

    /// Hard cap on the in-memory audit buffer. Oldest events are dropped
    /// when the cap is reached.
    #[serde(default = "default_max_audit_buffer_size")]
    pub max_audit_buffer_size: usize,
}

const fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_heartbeat_failure_threshold() -> u32 {
    10
}

const fn default_audit_batch_size() -> usize {
    100
}

const fn default_audit_flush_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_audit_buffer_size() -> usize {
    10_000
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            control_plane_url: None,
            org_id: None,
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_failure_threshold: default_heartbeat_failure_threshold(),
            offline_mode: OfflineMode::default(),
            audit_batch_size: default_audit_batch_size(),
            audit_flush_interval: default_audit_flush_interval(),
            max_audit_buffer_size: default_max_audit_buffer_size(),
        }
    }
}

impl GovernanceConfig {
    /// Returns `true` when a control plane is configured.
    #[must_use]
    pub fn has_control_plane(&self) -> bool {
        self.control_plane_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

/// Enforcement behavior once the control plane is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineMode {
    /// Activate the kill switch; every tool call is blocked.
    #[default]
    Block,
    /// Bypass all checks; every tool call is allowed.
    Allow,
    /// Keep evaluating against the cached (possibly stale) policy.
    Cached,
}

impl std::fmt::Display for OfflineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Allow => write!(f, "allow"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GovernanceConfig::default();
        assert!(config.control_plane_url.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_failure_threshold, 10);
        assert_eq!(config.offline_mode, OfflineMode::Block);
        assert_eq!(config.audit_batch_size, 100);
        assert_eq!(config.audit_flush_interval, Duration::from_secs(30));
        assert_eq!(config.max_audit_buffer_size, 10_000);
        assert!(!config.has_control_plane());
    }

    #[test]
    fn test_config_partial_document() {
        let config: GovernanceConfig = serde_json::from_str(
            r#"{
                "control_plane_url": "https://govern.example.com",
                "heartbeat_interval": "10s",
                "offline_mode": "cached"
            }"#,
        )
        .unwrap();

        assert!(config.has_control_plane());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.offline_mode, OfflineMode::Cached);
        // Everything else falls back to defaults.
        assert_eq!(config.audit_batch_size, 100);
    }

    #[test]
    fn test_blank_control_plane_url_counts_as_absent() {
        let config = GovernanceConfig {
            control_plane_url: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!config.has_control_plane());
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
