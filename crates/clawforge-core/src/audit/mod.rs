//! Governance audit events.
//!
//! Every enforcement decision and every governance transition produces one
//! [`AuditEvent`]. Events are immutable once created, identified by their
//! position in the buffer (`enqueue_seq`), and delivered to the control
//! plane at least once; the server tolerates duplicates.
//!
//! Wire format is camelCase JSON with epoch-millisecond timestamps, matching
//! the control plane's audit ingest endpoint. Metadata uses a `BTreeMap` so
//! serialization is deterministic.

mod buffer;

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub use buffer::BoundedBuffer;

/// The kind of governance event.
///
/// `KillSwitchActivated` is also the legacy wire name for connection-state
/// transitions; `metadata.kind` discriminates the two
/// (`kill_switch` vs `connection_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A tool invocation was authorized or blocked.
    ToolCallAttempt,
    /// A kill-switch edge or a connection-state transition.
    KillSwitchActivated,
    /// Session lifecycle: engine start/stop, token rotation.
    SessionEvent,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToolCallAttempt => write!(f, "tool_call_attempt"),
            Self::KillSwitchActivated => write!(f, "kill_switch_activated"),
            Self::SessionEvent => write!(f, "session_event"),
        }
    }
}

/// The outcome recorded on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// A tool call was allowed.
    Allowed,
    /// A tool call was blocked.
    Blocked,
    /// A governance degradation (failure transition, kill-switch engage).
    Error,
    /// A governance recovery or routine success.
    Success,
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Blocked => write!(f, "blocked"),
            Self::Error => write!(f, "error"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// One immutable governance audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// User the event belongs to.
    pub user_id: String,

    /// Organization the event belongs to.
    pub org_id: String,

    /// Agent within the assistant, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Assistant session key, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,

    /// Event kind.
    #[serde(rename = "eventType")]
    pub kind: EventKind,

    /// Normalized tool name for `tool_call_attempt` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Event outcome.
    pub outcome: EventOutcome,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Which rule or transition produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Extra detail; only populated at audit level `full`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,

    /// Position in the local buffer; preserves end-to-end ordering.
    #[serde(default)]
    pub enqueue_seq: u64,
}

/// A partially-built event handed to the pipeline.
///
/// The pipeline stamps identity (`user_id`, `org_id`), the timestamp, and
/// the enqueue sequence, and strips metadata unless the audit level is
/// `full`.
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Event kind.
    pub kind: EventKind,
    /// Event outcome.
    pub outcome: EventOutcome,
    /// Normalized tool name, for tool events.
    pub tool_name: Option<String>,
    /// Rule or transition tag.
    pub reason: Option<String>,
    /// Agent within the assistant.
    pub agent_id: Option<String>,
    /// Assistant session key.
    pub session_key: Option<String>,
    /// Extra detail, subject to the audit level.
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl EventDraft {
    /// Create a draft with the mandatory fields.
    #[must_use]
    pub const fn new(kind: EventKind, outcome: EventOutcome) -> Self {
        Self {
            kind,
            outcome,
            tool_name: None,
            reason: None,
            agent_id: None,
            session_key: None,
            metadata: None,
        }
    }

    /// Set the tool name.
    #[must_use]
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set the reason tag.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the agent ID.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the session key.
    #[must_use]
    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    /// Finalize the draft into an event.
    ///
    /// `keep_metadata` is `false` below audit level `full`; the metadata map
    /// is dropped rather than emptied so the wire stays clean.
    #[must_use]
    pub fn into_event(
        self,
        user_id: impl Into<String>,
        org_id: impl Into<String>,
        keep_metadata: bool,
    ) -> AuditEvent {
        AuditEvent {
            user_id: user_id.into(),
            org_id: org_id.into(),
            agent_id: self.agent_id,
            session_key: self.session_key,
            kind: self.kind,
            tool_name: self.tool_name,
            outcome: self.outcome,
            timestamp: Utc::now().timestamp_millis(),
            reason: self.reason,
            metadata: if keep_metadata { self.metadata } else { None },
            enqueue_seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format_is_camel_case() {
        let event = EventDraft::new(EventKind::ToolCallAttempt, EventOutcome::Blocked)
            .with_tool_name("exec")
            .with_reason("deny_list")
            .into_event("user-1", "org-1", true);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["orgId"], "org-1");
        assert_eq!(json["eventType"], "tool_call_attempt");
        assert_eq!(json["toolName"], "exec");
        assert_eq!(json["outcome"], "blocked");
        assert_eq!(json["reason"], "deny_list");
        assert!(json.get("agentId").is_none());
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_metadata_stripped_below_full() {
        let draft = EventDraft::new(EventKind::ToolCallAttempt, EventOutcome::Allowed)
            .with_metadata("arguments", serde_json::json!({"path": "/tmp/x"}));

        let event = draft.clone().into_event("u", "o", false);
        assert!(event.metadata.is_none());

        let event = draft.into_event("u", "o", true);
        assert!(event.metadata.is_some());
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = EventDraft::new(EventKind::KillSwitchActivated, EventOutcome::Error)
            .with_reason("connection_state_change")
            .with_metadata("from", serde_json::json!("connected"))
            .into_event("u", "o", true);

        let line = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }
}
